//! Structured-outputs engine.
//!
//! The entire response is one JSON object conforming to a schema that
//! embeds tool intent; nothing is interpreted until the stream ends.

use serde::Deserialize;
use serde_json::{Value, json};

use axon_types::{ToolCall, ToolDefinition};

use crate::engine::{
    ChunkDeltas, EngineKind, FinalizedTurn, RequestContext, StreamState, ToolCallBuilder,
    ToolCallEngine, ToolResultRecord, fold_common_chunk,
};
use crate::providers::chat::{ChatChunk, ChatMessage, ChatRequest};
use crate::providers::responses::ResponsesChunk;

pub struct StructuredEngine;

/// Schema-conforming response body.
#[derive(Debug, Deserialize)]
struct StructuredResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<StructuredToolCall>,
}

#[derive(Debug, Deserialize)]
struct StructuredToolCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

impl StructuredEngine {
    fn response_schema(tools: &[ToolDefinition]) -> Value {
        let tool_names: Vec<Value> = tools
            .iter()
            .map(|t| Value::String(t.name.to_ascii_lowercase()))
            .collect();
        let name_schema = if tool_names.is_empty() {
            json!({"type": "string"})
        } else {
            json!({"type": "string", "enum": tool_names})
        };

        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "agent_response",
                "schema": {
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "Assistant answer for the user",
                        },
                        "tool_calls": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": name_schema,
                                    "arguments": {"type": "object"},
                                },
                                "required": ["name"],
                            },
                        },
                    },
                    "required": ["content"],
                },
            },
        })
    }
}

impl ToolCallEngine for StructuredEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::StructuredOutputs
    }

    fn prepare_request(&self, ctx: RequestContext<'_>) -> ChatRequest {
        let mut messages = Vec::with_capacity(ctx.messages.len() + 1);
        if let Some(prompt) = ctx.system_prompt
            && !prompt.trim().is_empty()
        {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend(ctx.messages);

        let mut request = ChatRequest::new(ctx.model.model.clone(), messages);
        request.temperature = ctx.temperature;
        request.previous_response_id = ctx.previous_response_id;
        request.response_format = Some(Self::response_schema(ctx.tools));
        request
    }

    fn process_chunk(&self, chunk: &ChatChunk, state: &mut StreamState) -> ChunkDeltas {
        let deltas = ChunkDeltas {
            reasoning: fold_common_chunk(chunk, state),
            ..ChunkDeltas::default()
        };

        // Content is raw JSON here: buffer it, resolve at finalize. Emitting
        // it as visible deltas would leak schema syntax to observers.
        if let Some(choice) = chunk.choices.first()
            && let Some(text) = &choice.delta.content
        {
            state.raw_content.push_str(text);
        }

        deltas
    }

    fn process_response_chunk(
        &self,
        chunk: &ResponsesChunk,
        state: &mut StreamState,
    ) -> ChunkDeltas {
        match chunk.kind.as_str() {
            "response.output_text.delta" => {
                state.raw_content.push_str(chunk.str_field("delta"));
            }
            "response.completed" => {
                if let Some(id) = chunk.response().and_then(|r| r.get("id")).and_then(|v| v.as_str())
                {
                    state.response_id = Some(id.to_string());
                }
            }
            _ => {}
        }
        ChunkDeltas::default()
    }

    fn finalize(&self, mut state: StreamState) -> FinalizedTurn {
        match serde_json::from_str::<StructuredResponse>(state.raw_content.trim()) {
            Ok(parsed) => {
                state.content = parsed.content;
                for call in parsed.tool_calls {
                    if call.name.trim().is_empty() {
                        continue;
                    }
                    let id = state.synthesize_call_id();
                    state.tool_calls.push(ToolCallBuilder {
                        id,
                        name: call.name.trim().to_ascii_lowercase(),
                        arguments: call
                            .arguments
                            .map_or_else(|| "{}".to_string(), |v| v.to_string()),
                    });
                }
            }
            Err(err) => {
                // Truncated or non-conforming JSON: no tool calls, raw text out.
                tracing::warn!(%err, "Structured response did not parse; surfacing raw text");
                state.content = state.raw_content.clone();
            }
        }

        let has_tools = !state.tool_calls.is_empty();
        FinalizedTurn {
            content: state.content,
            raw_content: state.raw_content,
            tool_calls: state
                .tool_calls
                .into_iter()
                .map(|b| ToolCall::new(b.id, b.name, b.arguments))
                .collect(),
            reasoning: (!state.reasoning.is_empty()).then_some(state.reasoning),
            finish_reason: state
                .finish_reason
                .or_else(|| has_tools.then(|| "tool_calls".to_string())),
            response_id: state.response_id,
        }
    }

    fn assistant_history_entry(&self, content: &str, tool_calls: &[ToolCall]) -> ChatMessage {
        // Replay the schema shape the model was asked to produce.
        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|call| {
                json!({
                    "name": call.name,
                    "arguments": call.parse_arguments().unwrap_or(Value::Null),
                })
            })
            .collect();
        let body = json!({"content": content, "tool_calls": calls});
        ChatMessage::assistant(body.to_string())
    }

    fn tool_result_history_entries(&self, record: &ToolResultRecord) -> Vec<ChatMessage> {
        let payload = serde_json::to_string(&record.content).unwrap_or_else(|_| "{}".to_string());
        vec![ChatMessage::user(format!(
            "Tool result for {} ({}): {payload}",
            record.name, record.tool_call_id
        ))]
    }
}
