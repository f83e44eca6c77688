//! Shared fakes and builders for loop-level integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

use axon_core::config::AgentConfig;
use axon_core::core::runner::Agent;
use axon_core::providers::chat::{
    ChatChunk, ChatChunkChoice, ChatCompletion, ChatDelta, ChatRequest, ToolCallDelta,
    ToolCallFunctionDelta,
};
use axon_core::providers::{
    ChatChunkStream, LlmClient, ProviderError, ProviderKind, ProviderResult, ResolvedModel,
};
use axon_core::tools::{ToolHandler, ToolRegistry};
use axon_types::ToolDefinition;

/// One scripted model response.
#[derive(Clone)]
pub enum Script {
    /// Yield these chunks, then end the stream.
    Chunks(Vec<ChatChunk>),
    /// Yield these chunks, then hang until aborted.
    Hang(Vec<ChatChunk>),
    /// Fail the request itself.
    RequestError(ProviderError),
    /// Yield an error mid-stream.
    StreamError(ProviderError),
}

/// Scripted fake: each model call consumes the next script entry; the last
/// entry repeats forever (handy for max-iterations tests).
pub struct FakeLlmClient {
    scripts: Vec<Script>,
    cursor: AtomicU32,
    pub calls: AtomicU32,
    pub completion_reply: Mutex<String>,
    pub completion_calls: AtomicU32,
}

impl FakeLlmClient {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts,
            cursor: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            completion_reply: Mutex::new(r#"{"should_continue": false}"#.to_string()),
            completion_calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) as usize;
        let index = index.min(self.scripts.len().saturating_sub(1));
        self.scripts[index].clone()
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn stream_chat(&self, _request: ChatRequest) -> ProviderResult<ChatChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_script() {
            Script::Chunks(chunks) => {
                Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            Script::Hang(chunks) => Ok(futures_util::stream::iter(chunks.into_iter().map(Ok))
                .chain(futures_util::stream::pending())
                .boxed()),
            Script::RequestError(err) => Err(err),
            Script::StreamError(err) => Ok(futures_util::stream::iter(vec![Err(err)]).boxed()),
        }
    }

    async fn complete(&self, _request: ChatRequest) -> ProviderResult<ChatCompletion> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatCompletion {
            content: self.completion_reply.lock().unwrap().clone(),
            finish_reason: Some("stop".to_string()),
        })
    }
}

pub fn test_model() -> ResolvedModel {
    ResolvedModel {
        provider: ProviderKind::OpenAI,
        model: "gpt-test".to_string(),
        api_key: "sk-test".to_string(),
        base_url: "http://localhost:0".to_string(),
        supports_responses_api: false,
        supports_reasoning: true,
    }
}

pub fn text_chunk(text: &str) -> ChatChunk {
    ChatChunk {
        id: None,
        choices: vec![ChatChunkChoice {
            delta: ChatDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
            finish_reason: None,
        }],
    }
}

pub fn reasoning_chunk(text: &str) -> ChatChunk {
    ChatChunk {
        id: None,
        choices: vec![ChatChunkChoice {
            delta: ChatDelta {
                reasoning_content: Some(text.to_string()),
                ..Default::default()
            },
            finish_reason: None,
        }],
    }
}

pub fn tool_call_chunk(index: u32, id: &str, name: &str, arguments: &str) -> ChatChunk {
    ChatChunk {
        id: None,
        choices: vec![ChatChunkChoice {
            delta: ChatDelta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: Some(id.to_string()),
                    function: ToolCallFunctionDelta {
                        name: Some(name.to_string()),
                        arguments: Some(arguments.to_string()),
                    },
                }],
                ..Default::default()
            },
            finish_reason: None,
        }],
    }
}

pub fn finish_chunk(reason: &str) -> ChatChunk {
    ChatChunk {
        id: None,
        choices: vec![ChatChunkChoice {
            delta: ChatDelta::default(),
            finish_reason: Some(reason.to_string()),
        }],
    }
}

/// A text answer split into chunks plus the stop marker.
pub fn text_response(parts: &[&str]) -> Script {
    let mut chunks: Vec<ChatChunk> = parts.iter().map(|p| text_chunk(p)).collect();
    chunks.push(finish_chunk("stop"));
    Script::Chunks(chunks)
}

/// A single tool call answer.
pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> Script {
    Script::Chunks(vec![
        tool_call_chunk(0, id, name, arguments),
        finish_chunk("tool_calls"),
    ])
}

/// Registry with a `web_search` tool answering "sunny".
pub fn web_search_registry() -> ToolRegistry {
    let definition = ToolDefinition {
        name: "web_search".to_string(),
        description: "Search the web".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
        }),
    };
    let handler: ToolHandler = Arc::new(|input, _ctx| {
        let input = input.clone();
        Box::pin(async move {
            axon_types::ToolOutput::success(json!({
                "query": input.get("query").cloned().unwrap_or_default(),
                "answer": "sunny",
            }))
        })
    });
    ToolRegistry::new().with_tool(definition, handler)
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        model: "openai:gpt-test".to_string(),
        max_iterations: 5,
        ..AgentConfig::default()
    }
}

/// Builds an agent wired to the fake client and the given registry.
pub fn build_agent(
    config: AgentConfig,
    client: Arc<FakeLlmClient>,
    registry: ToolRegistry,
) -> Arc<Agent> {
    Arc::new(
        Agent::builder(config)
            .session_id("test-session")
            .resolved_model(test_model())
            .client(client)
            .tools(Arc::new(registry))
            .build()
            .expect("agent builds"),
    )
}
