//! Tool call engine strategy family.
//!
//! An engine owns the encoding/decoding between model output and structured
//! tool calls. Three variants exist: native function calling, prompt-
//! engineered tag parsing, and structured JSON-schema outputs. One concrete
//! engine is selected at agent construction.

mod native;
mod prompt;
mod structured;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use axon_types::{ImageContent, ToolCall, ToolDefinition};

pub use native::NativeEngine;
pub use prompt::PromptEngine;
pub use structured::StructuredEngine;

use crate::providers::chat::{ChatChunk, ChatMessage, ChatRequest};
use crate::providers::responses::ResponsesChunk;
use crate::providers::ResolvedModel;

/// Engine variant selector (config value).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Native,
    PromptEngineering,
    StructuredOutputs,
}

/// Builds the engine for a configured kind.
pub fn engine_for(kind: EngineKind) -> Arc<dyn ToolCallEngine> {
    match kind {
        EngineKind::Native => Arc::new(NativeEngine),
        EngineKind::PromptEngineering => Arc::new(PromptEngine),
        EngineKind::StructuredOutputs => Arc::new(StructuredEngine),
    }
}

/// Inputs for building one provider request.
#[derive(Debug)]
pub struct RequestContext<'a> {
    pub model: &'a ResolvedModel,
    pub system_prompt: Option<&'a str>,
    /// Non-system history messages, already folded by Message History.
    pub messages: Vec<ChatMessage>,
    pub tools: &'a [ToolDefinition],
    pub temperature: Option<f32>,
    /// Responses API continuation id, when the protocol supports it.
    pub previous_response_id: Option<String>,
}

/// Incremental deltas produced from one chunk — only the increment, never
/// the cumulative value.
#[derive(Debug, Default, PartialEq)]
pub struct ChunkDeltas {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_call_updates: Vec<ToolCallUpdate>,
}

impl ChunkDeltas {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.tool_call_updates.is_empty()
    }
}

/// Streaming tool-call update correlated by tool call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallUpdate {
    pub tool_call_id: String,
    pub name: String,
    pub arguments_delta: String,
}

/// Result of finalizing one streamed response.
#[derive(Debug, Clone, Default)]
pub struct FinalizedTurn {
    /// Visible assistant content.
    pub content: String,
    /// Everything the model emitted, tool-call syntax included.
    pub raw_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    /// Provider-side response id (Responses API).
    pub response_id: Option<String>,
}

impl FinalizedTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Prompt-engineering scanner phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanPhase {
    #[default]
    ScanningContent,
    BufferingToolCall,
}

/// Accumulating tool call under construction.
#[derive(Debug, Clone, Default)]
pub struct ToolCallBuilder {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Mutable accumulator for one streaming response.
///
/// One struct serves all engine variants; each uses the fields it needs.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Visible content accumulated so far.
    pub content: String,
    /// Raw model output, verbatim.
    pub raw_content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCallBuilder>,
    pub finish_reason: Option<String>,
    pub response_id: Option<String>,
    /// Native: provider tool-call index -> `tool_calls` slot.
    pub index_slots: HashMap<u32, usize>,
    /// Responses API: output item id -> `tool_calls` slot.
    pub item_slots: HashMap<String, usize>,
    /// Prompt engine: scanner phase.
    pub phase: ScanPhase,
    /// Prompt engine: text held back because it may open a delimiter.
    pub holdback: String,
    /// Prompt engine: buffered tool-call body.
    pub tool_buffer: String,
    /// Synthetic id counter for providers that omit call ids.
    pub next_synthetic_id: usize,
}

impl StreamState {
    pub fn synthesize_call_id(&mut self) -> String {
        self.next_synthetic_id += 1;
        format!("call_{}", self.next_synthetic_id)
    }
}

/// A tool result as the history fold sees it.
#[derive(Debug, Clone)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub name: String,
    pub content: Value,
    pub is_error: bool,
    pub image: Option<ImageContent>,
}

/// Strategy interface implemented by every engine variant.
pub trait ToolCallEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Turns the request context into a provider-call payload, encoding
    /// tool definitions according to the variant's convention.
    fn prepare_request(&self, ctx: RequestContext<'_>) -> ChatRequest;

    /// Fresh accumulator for one streaming response.
    fn new_state(&self) -> StreamState {
        StreamState::default()
    }

    /// Folds one chat-completions chunk into `state`, returning only the
    /// incremental deltas to emit.
    fn process_chunk(&self, chunk: &ChatChunk, state: &mut StreamState) -> ChunkDeltas;

    /// Analogous entry point for Responses API chunks.
    fn process_response_chunk(&self, chunk: &ResponsesChunk, state: &mut StreamState)
    -> ChunkDeltas;

    /// Called once after the stream ends. Must tolerate a stream that ended
    /// mid-tool-call: best-effort parsing, never an error — malformed
    /// partial syntax yields zero tool calls plus the raw text.
    fn finalize(&self, state: StreamState) -> FinalizedTurn;

    /// How an assistant turn (content + tool calls) lands in the history.
    fn assistant_history_entry(&self, content: &str, tool_calls: &[ToolCall]) -> ChatMessage;

    /// How one tool result lands in the history.
    fn tool_result_history_entries(&self, record: &ToolResultRecord) -> Vec<ChatMessage>;
}

/// Shared chat-completions folding used by the native and prompt engines:
/// reasoning and finish-reason handling are identical, content handling is
/// engine-specific.
pub(crate) fn fold_common_chunk(chunk: &ChatChunk, state: &mut StreamState) -> Option<String> {
    if state.response_id.is_none()
        && let Some(id) = &chunk.id
    {
        state.response_id = Some(id.clone());
    }

    let choice = chunk.choices.first()?;
    if let Some(reason) = &choice.finish_reason {
        state.finish_reason = Some(reason.clone());
    }

    let reasoning = choice.delta.effective_reasoning().map(ToString::to_string);
    if let Some(r) = &reasoning {
        state.reasoning.push_str(r);
    }
    reasoning
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_config_values() {
        assert_eq!(
            serde_json::from_str::<EngineKind>(r#""prompt_engineering""#).unwrap(),
            EngineKind::PromptEngineering
        );
        assert_eq!(EngineKind::default(), EngineKind::Native);
    }

    #[test]
    fn test_engine_factory_matches_kind() {
        for kind in [
            EngineKind::Native,
            EngineKind::PromptEngineering,
            EngineKind::StructuredOutputs,
        ] {
            assert_eq!(engine_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_synthetic_ids_are_sequential() {
        let mut state = StreamState::default();
        assert_eq!(state.synthesize_call_id(), "call_1");
        assert_eq!(state.synthesize_call_id(), "call_2");
    }
}
