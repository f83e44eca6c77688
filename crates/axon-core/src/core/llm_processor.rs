//! One iteration's request/response cycle.
//!
//! `Preparing -> Requesting -> Streaming -> Finalizing -> Done`, with
//! `Aborted` reachable from any state. Internal streaming is always on,
//! even when the caller-facing mode is non-streaming; the `streaming`
//! flag only controls whether incremental events are published.

use axon_types::EventKind;
use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::core::abort::AbortSignal;
use crate::core::event_stream::EventStream;
use crate::core::hooks::{AgentHooks, RequestPreparation};
use crate::core::history::MessageHistory;
use crate::core::tool_processor;
use crate::engine::{ChunkDeltas, FinalizedTurn, RequestContext, ToolCallEngine};
use crate::providers::{LlmClient, ProviderResult, ResolvedModel};
use crate::tools::{ToolContext, ToolProvider};

/// Everything one iteration needs, borrowed from the run.
pub struct IterationContext<'a> {
    pub stream: &'a EventStream,
    pub client: &'a dyn LlmClient,
    pub engine: &'a dyn ToolCallEngine,
    pub hooks: &'a dyn AgentHooks,
    pub tools: &'a dyn ToolProvider,
    pub history: &'a MessageHistory,
    pub model: &'a ResolvedModel,
    pub config: &'a AgentConfig,
    pub tool_ctx: &'a ToolContext,
    pub abort: &'a AbortSignal,
    pub system_prompt: Option<&'a str>,
    /// Caller-facing streaming mode (publish incremental events).
    pub streaming: bool,
}

/// Result of one iteration.
#[derive(Debug, Default)]
pub struct IterationOutcome {
    /// Finalized turn; absent when the iteration aborted mid-stream.
    pub turn: Option<FinalizedTurn>,
    /// Number of tool calls handed to the tool processor.
    pub tools_executed: usize,
    pub aborted: bool,
}

impl IterationOutcome {
    fn aborted() -> Self {
        Self {
            aborted: true,
            ..Self::default()
        }
    }
}

/// Runs one full iteration: prepare, request, stream, finalize, and hand
/// any tool calls to the tool processor.
///
/// # Errors
/// Propagates provider/network failures; the loop controller turns them
/// into an error-status run end.
pub async fn process_iteration(
    ctx: &IterationContext<'_>,
    iteration: u32,
) -> ProviderResult<IterationOutcome> {
    // Idempotent no-op when the run is already aborted.
    if ctx.abort.is_aborted() {
        return Ok(IterationOutcome::aborted());
    }

    if let Err(err) = ctx.hooks.on_iteration_start(iteration).await {
        tracing::warn!(iteration, %err, "Iteration hook failed");
    }

    let tools = match ctx.tools.available_tools().await {
        Ok(tools) => tools,
        Err(err) => {
            tracing::warn!(%err, "Tool provider failed; continuing with no tools");
            Vec::new()
        }
    };

    let original = RequestPreparation {
        system_prompt: ctx.system_prompt.map(ToString::to_string),
        tools,
    };
    let preparation = match ctx.hooks.prepare_request(original.clone()).await {
        Ok(preparation) => preparation,
        Err(err) => {
            tracing::warn!(%err, "Request preparation hook failed; using unmodified inputs");
            original
        }
    };

    let messages = ctx
        .history
        .to_messages(&ctx.stream.events(), ctx.engine);

    let use_responses_api = ctx.model.supports_responses_api && ctx.config.prefer_responses_api;
    let previous_response_id = use_responses_api
        .then(|| {
            ctx.stream
                .latest_assistant_response()
                .and_then(|event| match event.kind {
                    EventKind::AssistantMessage { response_id, .. } => response_id,
                    _ => None,
                })
        })
        .flatten();

    let request = ctx.engine.prepare_request(RequestContext {
        model: ctx.model,
        system_prompt: preparation.system_prompt.as_deref(),
        messages,
        tools: &preparation.tools,
        temperature: ctx.config.temperature,
        previous_response_id,
    });

    ctx.hooks.on_llm_request(&request).await;

    // One message id correlates every streaming event of this iteration
    // with the final consolidated event.
    let message_id = Uuid::new_v4().to_string();
    let mut state = ctx.engine.new_state();

    let completed = if use_responses_api {
        let mut chunks = ctx.client.stream_responses(request).await?;
        loop {
            tokio::select! {
                biased;
                () = ctx.abort.wait() => break false,
                next = chunks.next() => match next {
                    Some(Ok(chunk)) => {
                        let deltas = ctx.engine.process_response_chunk(&chunk, &mut state);
                        publish_deltas(ctx, &message_id, deltas);
                    }
                    Some(Err(err)) => return Err(err),
                    None => break true,
                },
            }
        }
    } else {
        let mut chunks = ctx.client.stream_chat(request).await?;
        loop {
            tokio::select! {
                biased;
                () = ctx.abort.wait() => break false,
                next = chunks.next() => match next {
                    Some(Ok(chunk)) => {
                        let deltas = ctx.engine.process_chunk(&chunk, &mut state);
                        publish_deltas(ctx, &message_id, deltas);
                    }
                    Some(Err(err)) => return Err(err),
                    None => break true,
                },
            }
        }
    };

    if !completed {
        // Abort mid-stream: partial accumulation is discarded, no final
        // event is emitted for this iteration.
        return Ok(IterationOutcome::aborted());
    }

    let turn = ctx.engine.finalize(state);
    emit_final_events(ctx, &message_id, &turn);
    ctx.hooks.on_llm_response(&turn).await;

    let mut outcome = IterationOutcome {
        tools_executed: turn.tool_calls.len(),
        ..IterationOutcome::default()
    };

    if turn.has_tool_calls() && !ctx.abort.is_aborted() {
        tool_processor::process_tool_calls(ctx, &turn.tool_calls).await;
    }

    outcome.aborted = ctx.abort.is_aborted();
    outcome.turn = Some(turn);
    Ok(outcome)
}

/// Publishes incremental events for one chunk's deltas (streaming mode
/// only), all correlated by the iteration's message id.
fn publish_deltas(ctx: &IterationContext<'_>, message_id: &str, deltas: ChunkDeltas) {
    if !ctx.streaming || deltas.is_empty() {
        return;
    }

    if let Some(delta) = deltas.content {
        ctx.stream.emit(EventKind::AssistantStreamingMessage {
            message_id: message_id.to_string(),
            delta,
        });
    }
    if let Some(delta) = deltas.reasoning {
        ctx.stream
            .emit(EventKind::AssistantStreamingThinkingMessage {
                message_id: message_id.to_string(),
                delta,
            });
    }
    for update in deltas.tool_call_updates {
        ctx.stream.emit(EventKind::AssistantStreamingToolCall {
            message_id: message_id.to_string(),
            tool_call_id: update.tool_call_id,
            name: update.name,
            arguments_delta: update.arguments_delta,
        });
    }
}

/// Emits the consolidated events for a finalized turn: one assistant
/// message (always after all its streaming events), optional thinking,
/// and one `tool_call` event per finalized call.
fn emit_final_events(ctx: &IterationContext<'_>, message_id: &str, turn: &FinalizedTurn) {
    ctx.stream.emit(EventKind::AssistantMessage {
        message_id: message_id.to_string(),
        content: turn.content.clone(),
        tool_calls: turn.tool_calls.clone(),
        finish_reason: turn.finish_reason.clone(),
        response_id: turn.response_id.clone(),
    });

    if let Some(reasoning) = &turn.reasoning {
        ctx.stream.emit(EventKind::AssistantThinkingMessage {
            message_id: message_id.to_string(),
            content: reasoning.clone(),
        });
    }

    for call in &turn.tool_calls {
        let arguments = call
            .parse_arguments()
            .unwrap_or_else(|_| Value::String(call.arguments.clone()));
        ctx.stream.emit(EventKind::ToolCall {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        });
    }
}
