//! Agent loop controller.
//!
//! `IDLE -> EXECUTING -> IDLE`, with `ABORTED` reachable from `EXECUTING`.
//! Every run is bracketed by `agent_run_start` / `agent_run_end`;
//! `agent_run_end` fires exactly once per run, on every exit path.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;

use axon_types::{ContentPart, Event, EventKind, RunError, RunStatus};

use crate::config::AgentConfig;
use crate::core::abort::AbortSignal;
use crate::core::event_stream::EventStream;
use crate::core::hooks::{AgentHooks, NoopHooks};
use crate::core::history::MessageHistory;
use crate::core::llm_processor::{self, IterationContext};
use crate::core::reflection::ReflectionService;
use crate::engine::{ToolCallEngine, engine_for};
use crate::providers::{HttpLlmClient, LlmClient, ResolvedModel, resolve_model};
use crate::tools::{ToolContext, ToolProvider, ToolRegistry};

/// Caller input: plain text or multimodal parts.
#[derive(Debug, Clone)]
pub enum RunInput {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl RunInput {
    fn into_parts(self) -> Vec<ContentPart> {
        match self {
            RunInput::Text(text) => vec![ContentPart::text(text)],
            RunInput::Parts(parts) => parts,
        }
    }

    fn as_task_text(&self) -> String {
        match self {
            RunInput::Text(text) => text.clone(),
            RunInput::Parts(parts) => axon_types::message::parts_to_text(parts),
        }
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        RunInput::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        RunInput::Text(text)
    }
}

impl From<Vec<ContentPart>> for RunInput {
    fn from(parts: Vec<ContentPart>) -> Self {
        RunInput::Parts(parts)
    }
}

/// Out-of-band context delivered alongside the user input.
#[derive(Debug, Clone)]
pub struct EnvironmentInput {
    pub content: Vec<ContentPart>,
    pub description: Option<String>,
}

/// One run invocation.
#[derive(Debug)]
pub struct RunRequest {
    pub input: RunInput,
    /// Session id recorded on the run events; the agent's own id when unset.
    pub session_id: Option<String>,
    /// Caller-facing streaming mode: publish incremental events.
    pub stream: bool,
    /// Provider override for this and subsequent runs.
    pub provider: Option<String>,
    /// Model override for this and subsequent runs.
    pub model: Option<String>,
    pub environment_input: Option<EnvironmentInput>,
    /// Cancellation handle; a fresh one is created when unset.
    pub abort: Option<AbortSignal>,
}

impl RunRequest {
    pub fn new(input: impl Into<RunInput>) -> Self {
        Self {
            input: input.into(),
            session_id: None,
            stream: false,
            provider: None,
            model: None,
            environment_input: None,
            abort: None,
        }
    }

    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    #[must_use]
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }

    fn model_override(&self) -> Option<String> {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => Some(format!("{provider}:{model}")),
            (None, Some(model)) => Some(model.clone()),
            (Some(provider), None) => {
                tracing::warn!(%provider, "Provider override without model; ignoring");
                None
            }
            (None, None) => None,
        }
    }
}

/// Final result of a run. The same information is carried by the
/// `agent_run_end` event for observers.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub content: Option<String>,
    pub error: Option<RunError>,
    pub iterations: u32,
    pub elapsed_ms: u64,
    /// The terminating `agent_run_end` event, when the run started at all.
    pub final_event: Option<Event>,
}

impl RunResult {
    pub fn is_successful(&self) -> bool {
        self.status.is_successful()
    }
}

/// Loop controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentState {
    Idle,
    Executing,
}

/// The agent: loop controller plus its injected collaborators.
pub struct Agent {
    config: AgentConfig,
    engine: Arc<dyn ToolCallEngine>,
    client: Arc<dyn LlmClient>,
    hooks: Arc<dyn AgentHooks>,
    tools: Arc<dyn ToolProvider>,
    stream: Arc<EventStream>,
    history: MessageHistory,
    reflection: ReflectionService,
    tool_ctx: ToolContext,
    model: Mutex<ResolvedModel>,
    state: Mutex<AgentState>,
    current_abort: Mutex<AbortSignal>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// The session event stream (subscribe here for observation).
    pub fn event_stream(&self) -> &Arc<EventStream> {
        &self.stream
    }

    /// Replaces the session model. Takes effect at the next iteration
    /// boundary, never retroactively for an in-flight request.
    ///
    /// # Errors
    /// Returns an error when the model cannot be resolved.
    pub fn set_model(&self, model: &str) -> anyhow::Result<()> {
        let resolved = resolve_model(model, &self.config)?;
        *self.model.lock().expect("model lock poisoned") = resolved;
        Ok(())
    }

    /// Aborts the in-flight run, if any.
    pub fn abort(&self) {
        self.current_abort
            .lock()
            .expect("abort lock poisoned")
            .abort();
    }

    /// Runs to completion and returns the final result (non-streaming
    /// callers; internal streaming stays on regardless).
    pub async fn run(&self, request: RunRequest) -> RunResult {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == AgentState::Executing {
                return RunResult {
                    status: RunStatus::Error,
                    content: None,
                    error: Some(RunError {
                        code: "busy".to_string(),
                        message: "A run is already executing on this agent".to_string(),
                        details: None,
                    }),
                    iterations: 0,
                    elapsed_ms: 0,
                    final_event: None,
                };
            }
            *state = AgentState::Executing;
        }

        let result = self.run_inner(request).await;
        *self.state.lock().expect("state lock poisoned") = AgentState::Idle;
        result
    }

    /// Starts a run and returns the live event feed, terminated by the
    /// run's `agent_run_end` event.
    pub fn run_streaming(self: &Arc<Self>, request: RunRequest) -> mpsc::Receiver<Arc<Event>> {
        let rx = self.stream.subscribe_channel();
        let agent = Arc::clone(self);
        let request = RunRequest {
            stream: true,
            ..request
        };
        tokio::spawn(async move {
            let _ = agent.run(request).await;
        });
        rx
    }

    async fn run_inner(&self, request: RunRequest) -> RunResult {
        let started = Instant::now();
        let abort = request.abort.clone().unwrap_or_default();
        *self.current_abort.lock().expect("abort lock poisoned") = abort.clone();

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| self.stream.session_id().to_string());

        // Request-level override becomes the session model before the run.
        if let Some(selector) = request.model_override()
            && let Err(err) = self.set_model(&selector)
        {
            tracing::warn!(%err, "Model override failed; keeping current model");
        }

        let run_model = self.model.lock().expect("model lock poisoned").clone();
        self.stream.emit(EventKind::AgentRunStart {
            session_id: session_id.clone(),
            provider: run_model.provider.id().to_string(),
            model: run_model.model.clone(),
            max_iterations: self.config.max_iterations,
        });

        let task_text = request.input.as_task_text();
        self.stream.emit(EventKind::UserMessage {
            content: request.input.into_parts(),
        });
        if let Some(env) = request.environment_input {
            self.stream.emit(EventKind::EnvironmentInput {
                content: env.content,
                description: env.description,
            });
        }

        let (status, content, error, iterations) =
            self.run_loop(&task_text, request.stream, &abort).await;

        let final_event = self.stream.emit(EventKind::AgentRunEnd {
            session_id,
            status,
            iterations,
            elapsed_ms: started.elapsed().as_millis() as u64,
            content: content.clone(),
            error: error.clone(),
        });

        RunResult {
            status,
            content,
            error,
            iterations,
            elapsed_ms: started.elapsed().as_millis() as u64,
            final_event: Some(final_event),
        }
    }

    /// The iteration loop. Returns (status, content, error, iterations);
    /// the caller emits the single `agent_run_end`.
    async fn run_loop(
        &self,
        task_text: &str,
        streaming: bool,
        abort: &AbortSignal,
    ) -> (RunStatus, Option<String>, Option<RunError>, u32) {
        let mut last_content: Option<String> = None;

        for iteration in 1..=self.config.max_iterations {
            if abort.is_aborted() {
                return (RunStatus::Aborted, last_content, None, iteration - 1);
            }

            // Session-level overrides are read fresh each iteration.
            let model = self.model.lock().expect("model lock poisoned").clone();
            let ctx = IterationContext {
                stream: self.stream.as_ref(),
                client: self.client.as_ref(),
                engine: self.engine.as_ref(),
                hooks: self.hooks.as_ref(),
                tools: self.tools.as_ref(),
                history: &self.history,
                model: &model,
                config: &self.config,
                tool_ctx: &self.tool_ctx,
                abort,
                system_prompt: self.config.system_prompt.as_deref(),
                streaming,
            };

            let outcome = match llm_processor::process_iteration(&ctx, iteration).await {
                Ok(outcome) => outcome,
                Err(provider_err) => {
                    self.stream.emit(EventKind::System {
                        message: format!("Provider error: {}", provider_err.message),
                        details: provider_err.details.clone(),
                    });
                    let error = RunError {
                        code: provider_err.kind.code().to_string(),
                        message: provider_err.message,
                        details: provider_err.details,
                    };
                    return (RunStatus::Error, last_content, Some(error), iteration);
                }
            };

            if outcome.aborted {
                if let Some(turn) = &outcome.turn
                    && !turn.content.is_empty()
                {
                    last_content = Some(turn.content.clone());
                }
                return (RunStatus::Aborted, last_content, None, iteration);
            }

            let Some(turn) = outcome.turn else {
                // Defensive: a non-aborted iteration always carries a turn.
                continue;
            };
            if !turn.content.is_empty() {
                last_content = Some(turn.content.clone());
            }

            if outcome.tools_executed > 0 {
                // Tool results are on the stream; go around again (the
                // iteration cap is enforced by the loop bounds).
                continue;
            }

            // Plain content: candidate final answer.
            let verdict = self.reflection.evaluate(task_text, &turn.content).await;
            if verdict.should_continue && iteration < self.config.max_iterations {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "the task appears unfinished".to_string());
                self.stream.emit(EventKind::EnvironmentInput {
                    content: vec![ContentPart::text(format!(
                        "The previous answer is not final: {reason}. Continue working on the task."
                    ))],
                    description: Some("reflection".to_string()),
                });
                continue;
            }
            if verdict.should_continue {
                // Reflection wants more work but the cap is reached.
                break;
            }

            return (
                RunStatus::Successful,
                Some(turn.content),
                None,
                iteration,
            );
        }

        (
            RunStatus::MaxIterations,
            last_content,
            None,
            self.config.max_iterations,
        )
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("session", &self.stream.session_id())
            .field("engine", &self.engine.kind())
            .finish()
    }
}

/// Builder wiring the collaborators; tests inject fakes here.
pub struct AgentBuilder {
    config: AgentConfig,
    session_id: Option<String>,
    client: Option<Arc<dyn LlmClient>>,
    hooks: Option<Arc<dyn AgentHooks>>,
    tools: Option<Arc<dyn ToolProvider>>,
    resolved_model: Option<ResolvedModel>,
    tool_ctx: Option<ToolContext>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            session_id: None,
            client: None,
            hooks: None,
            tools: None,
            resolved_model: None,
            tool_ctx: None,
        }
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: Arc<dyn ToolProvider>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Bypasses env-based model resolution (tests, embedders with their
    /// own credential handling).
    #[must_use]
    pub fn resolved_model(mut self, model: ResolvedModel) -> Self {
        self.resolved_model = Some(model);
        self
    }

    #[must_use]
    pub fn tool_context(mut self, tool_ctx: ToolContext) -> Self {
        self.tool_ctx = Some(tool_ctx);
        self
    }

    /// # Errors
    /// Returns an error when the configured model cannot be resolved.
    pub fn build(self) -> anyhow::Result<Agent> {
        let resolved = match self.resolved_model {
            Some(model) => model,
            None => resolve_model(&self.config.model, &self.config)?,
        };

        let client: Arc<dyn LlmClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpLlmClient::new(resolved.clone())),
        };

        let reflection = if self.config.reflection.enabled {
            let model = self
                .config
                .reflection
                .model
                .clone()
                .unwrap_or_else(|| resolved.model.clone());
            ReflectionService::new(Arc::clone(&client), model)
        } else {
            ReflectionService::disabled()
        };

        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut tool_ctx = self.tool_ctx.unwrap_or_default();
        if tool_ctx.timeout.is_none() {
            tool_ctx.timeout = self.config.tool_timeout();
        }

        Ok(Agent {
            engine: engine_for(self.config.engine),
            history: MessageHistory::new(self.config.max_images, self.config.max_text_len),
            stream: Arc::new(EventStream::new(session_id)),
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            tools: self.tools.unwrap_or_else(|| Arc::new(ToolRegistry::new())),
            reflection,
            tool_ctx,
            model: Mutex::new(resolved),
            state: Mutex::new(AgentState::Idle),
            current_abort: Mutex::new(AbortSignal::new()),
            client,
            config: self.config,
        })
    }
}
