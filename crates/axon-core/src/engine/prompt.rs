//! Prompt-engineering engine.
//!
//! Tool calls are delimited text blocks inside the normal content stream:
//!
//! ```text
//! <tool_call>
//! {"name": "search", "arguments": {"query": "weather"}}
//! </tool_call>
//! ```
//!
//! The scanner is an explicit two-phase state machine so delimiters split
//! across chunk boundaries (down to one byte per chunk) parse identically
//! to a single chunk.

use serde::Deserialize;
use serde_json::Value;

use axon_types::{ToolCall, ToolDefinition};

use crate::engine::{
    ChunkDeltas, EngineKind, FinalizedTurn, RequestContext, ScanPhase, StreamState,
    ToolCallBuilder, ToolCallEngine, ToolCallUpdate, ToolResultRecord, fold_common_chunk,
};
use crate::prompts::TOOL_CALL_PROMPT_TEMPLATE;
use crate::providers::chat::{ChatChunk, ChatMessage, ChatRequest};
use crate::providers::responses::ResponsesChunk;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

pub struct PromptEngine;

/// Expected JSON body between the delimiters.
#[derive(Debug, Deserialize)]
struct ToolCallBody {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

impl PromptEngine {
    /// Feeds one content fragment through the scanner.
    ///
    /// Returns the newly visible content and any tool-call bodies completed
    /// by this fragment.
    fn scan(state: &mut StreamState, input: &str) -> (String, Vec<String>) {
        let mut visible = String::new();
        let mut completed = Vec::new();
        let mut pending = std::mem::take(&mut state.holdback);
        pending.push_str(input);

        loop {
            match state.phase {
                ScanPhase::ScanningContent => {
                    if let Some(pos) = pending.find(OPEN_TAG) {
                        visible.push_str(&pending[..pos]);
                        pending = pending[pos + OPEN_TAG.len()..].to_string();
                        state.phase = ScanPhase::BufferingToolCall;
                        state.tool_buffer.clear();
                    } else {
                        // Hold back a suffix that may be the start of a
                        // delimiter arriving in the next chunk.
                        let keep = longest_suffix_prefix(&pending, OPEN_TAG);
                        visible.push_str(&pending[..pending.len() - keep]);
                        state.holdback = pending[pending.len() - keep..].to_string();
                        break;
                    }
                }
                ScanPhase::BufferingToolCall => {
                    state.tool_buffer.push_str(&pending);
                    pending.clear();
                    if let Some(pos) = state.tool_buffer.find(CLOSE_TAG) {
                        completed.push(state.tool_buffer[..pos].to_string());
                        pending = state.tool_buffer[pos + CLOSE_TAG.len()..].to_string();
                        state.tool_buffer.clear();
                        state.phase = ScanPhase::ScanningContent;
                    } else {
                        break;
                    }
                }
            }
        }

        (visible, completed)
    }

    /// Applies a content fragment to the state, producing deltas.
    fn apply_content(state: &mut StreamState, text: &str, deltas: &mut ChunkDeltas) {
        state.raw_content.push_str(text);
        let (visible, completed) = Self::scan(state, text);
        if !visible.is_empty() {
            state.content.push_str(&visible);
            match &mut deltas.content {
                Some(existing) => existing.push_str(&visible),
                None => deltas.content = Some(visible),
            }
        }

        for body in completed {
            match parse_tool_body(&body) {
                Some((name, arguments)) => {
                    let id = state.synthesize_call_id();
                    state.tool_calls.push(ToolCallBuilder {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    });
                    deltas.tool_call_updates.push(ToolCallUpdate {
                        tool_call_id: id,
                        name,
                        arguments_delta: arguments,
                    });
                }
                None => {
                    // Malformed body: restore the raw text as visible content.
                    tracing::warn!("Dropping malformed tool call body");
                    state.content.push_str(&body);
                    match &mut deltas.content {
                        Some(existing) => existing.push_str(&body),
                        None => deltas.content = Some(body),
                    }
                }
            }
        }
    }

    fn render_tool_docs(tools: &[ToolDefinition]) -> String {
        let mut env = minijinja::Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        let listed: Vec<_> = tools
            .iter()
            .map(|tool| {
                minijinja::context! {
                    name => tool.name.to_ascii_lowercase(),
                    description => tool.description,
                    schema => serde_json::to_string(&tool.input_schema)
                        .unwrap_or_else(|_| "{}".to_string()),
                }
            })
            .collect();

        env.render_str(
            TOOL_CALL_PROMPT_TEMPLATE,
            minijinja::context! { tools => listed, open_tag => OPEN_TAG, close_tag => CLOSE_TAG },
        )
        .unwrap_or_else(|err| {
            tracing::warn!(%err, "Tool docs template failed; using plain listing");
            let names: Vec<_> = tools.iter().map(|t| t.name.to_ascii_lowercase()).collect();
            format!(
                "You may call these tools by emitting {OPEN_TAG}{{\"name\": ..., \"arguments\": ...}}{CLOSE_TAG}: {}",
                names.join(", ")
            )
        })
    }
}

impl ToolCallEngine for PromptEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::PromptEngineering
    }

    fn prepare_request(&self, ctx: RequestContext<'_>) -> ChatRequest {
        let mut system = ctx.system_prompt.unwrap_or_default().trim().to_string();
        if !ctx.tools.is_empty() {
            let docs = Self::render_tool_docs(ctx.tools);
            if system.is_empty() {
                system = docs;
            } else {
                system = format!("{system}\n\n{docs}");
            }
        }

        let mut messages = Vec::with_capacity(ctx.messages.len() + 1);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(ctx.messages);

        let mut request = ChatRequest::new(ctx.model.model.clone(), messages);
        request.temperature = ctx.temperature;
        request.previous_response_id = ctx.previous_response_id;
        request
    }

    fn process_chunk(&self, chunk: &ChatChunk, state: &mut StreamState) -> ChunkDeltas {
        let mut deltas = ChunkDeltas {
            reasoning: fold_common_chunk(chunk, state),
            ..ChunkDeltas::default()
        };

        if let Some(choice) = chunk.choices.first()
            && let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            Self::apply_content(state, text, &mut deltas);
        }

        deltas
    }

    fn process_response_chunk(
        &self,
        chunk: &ResponsesChunk,
        state: &mut StreamState,
    ) -> ChunkDeltas {
        let mut deltas = ChunkDeltas::default();
        match chunk.kind.as_str() {
            "response.output_text.delta" => {
                let text = chunk.str_field("delta");
                if !text.is_empty() {
                    Self::apply_content(state, text, &mut deltas);
                }
            }
            "response.reasoning_summary_text.delta" => {
                let text = chunk.str_field("delta");
                if !text.is_empty() {
                    state.reasoning.push_str(text);
                    deltas.reasoning = Some(text.to_string());
                }
            }
            "response.completed" => {
                if let Some(id) = chunk.response().and_then(|r| r.get("id")).and_then(|v| v.as_str())
                {
                    state.response_id = Some(id.to_string());
                }
            }
            _ => {}
        }
        deltas
    }

    fn finalize(&self, mut state: StreamState) -> FinalizedTurn {
        // An unterminated block may still be complete JSON.
        if state.phase == ScanPhase::BufferingToolCall {
            let buffer = std::mem::take(&mut state.tool_buffer);
            match parse_tool_body(&buffer) {
                Some((name, arguments)) => {
                    let id = state.synthesize_call_id();
                    state.tool_calls.push(ToolCallBuilder {
                        id,
                        name,
                        arguments,
                    });
                }
                None => {
                    tracing::warn!("Stream ended mid tool call; surfacing raw text");
                    state.content.push_str(&buffer);
                }
            }
        }
        // A partial opening tag that never completed is plain content.
        let holdback = std::mem::take(&mut state.holdback);
        state.content.push_str(&holdback);

        let has_tools = !state.tool_calls.is_empty();
        FinalizedTurn {
            content: state.content.trim().to_string(),
            raw_content: state.raw_content,
            tool_calls: state
                .tool_calls
                .into_iter()
                .map(|b| ToolCall::new(b.id, b.name, b.arguments))
                .collect(),
            reasoning: (!state.reasoning.is_empty()).then_some(state.reasoning),
            finish_reason: state.finish_reason.or_else(|| {
                has_tools.then(|| "tool_calls".to_string())
            }),
            response_id: state.response_id,
        }
    }

    fn assistant_history_entry(&self, content: &str, tool_calls: &[ToolCall]) -> ChatMessage {
        // Replay the turn exactly as the model emitted it, tags included,
        // so the transcript stays self-consistent for the model.
        let mut text = content.to_string();
        for call in tool_calls {
            let body = serde_json::json!({
                "name": call.name,
                "arguments": call.parse_arguments().unwrap_or(Value::Null),
            });
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("{OPEN_TAG}{body}{CLOSE_TAG}"));
        }
        ChatMessage::assistant(text)
    }

    fn tool_result_history_entries(&self, record: &ToolResultRecord) -> Vec<ChatMessage> {
        // No native tool role: results go back as user-visible text.
        let payload = serde_json::to_string(&record.content).unwrap_or_else(|_| "{}".to_string());
        vec![ChatMessage::user(format!(
            "Tool result for {} ({}): {payload}",
            record.name, record.tool_call_id
        ))]
    }
}

fn parse_tool_body(body: &str) -> Option<(String, String)> {
    let parsed: ToolCallBody = serde_json::from_str(body.trim()).ok()?;
    if parsed.name.trim().is_empty() {
        return None;
    }
    let arguments = match parsed.arguments {
        None => "{}".to_string(),
        Some(value) => value.to_string(),
    };
    Some((parsed.name.trim().to_ascii_lowercase(), arguments))
}

/// Longest suffix of `s` that is a proper prefix of `tag`.
fn longest_suffix_prefix(s: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(s.len());
    for k in (1..=max).rev() {
        if s.ends_with(&tag[..k]) {
            return k;
        }
    }
    0
}
