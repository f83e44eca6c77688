//! Native function-calling engine.
//!
//! Tool calls arrive as structured deltas (index, id, name, incremental
//! argument fragments); state accumulates per-index argument strings.

use axon_types::ToolCall;

use crate::engine::{
    ChunkDeltas, EngineKind, FinalizedTurn, RequestContext, StreamState, ToolCallBuilder,
    ToolCallEngine, ToolCallUpdate, ToolResultRecord, fold_common_chunk,
};
use crate::providers::chat::{
    ChatChunk, ChatContentPart, ChatMessage, ChatRequest, ChatToolCall, ChatToolDefinition,
};
use crate::providers::responses::ResponsesChunk;

pub struct NativeEngine;

impl NativeEngine {
    fn slot_for_index(state: &mut StreamState, index: u32) -> usize {
        if let Some(slot) = state.index_slots.get(&index) {
            return *slot;
        }
        let slot = state.tool_calls.len();
        state.tool_calls.push(ToolCallBuilder::default());
        state.index_slots.insert(index, slot);
        slot
    }
}

impl ToolCallEngine for NativeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Native
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
        if !ctx.tools.is_empty() {
            request.tools = Some(ctx.tools.iter().map(ChatToolDefinition::from).collect());
        }
        request
    }

    fn process_chunk(&self, chunk: &ChatChunk, state: &mut StreamState) -> ChunkDeltas {
        let mut deltas = ChunkDeltas {
            reasoning: fold_common_chunk(chunk, state),
            ..ChunkDeltas::default()
        };

        let Some(choice) = chunk.choices.first() else {
            return deltas;
        };

        if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            state.content.push_str(text);
            state.raw_content.push_str(text);
            deltas.content = Some(text.clone());
        }

        for tc in &choice.delta.tool_calls {
            let slot = Self::slot_for_index(state, tc.index);
            let is_new = state.tool_calls[slot].id.is_empty();
            if is_new {
                state.tool_calls[slot].id = match &tc.id {
                    Some(id) if !id.is_empty() => id.clone(),
                    _ => state.synthesize_call_id(),
                };
            }
            let builder = &mut state.tool_calls[slot];
            if builder.name.is_empty()
                && let Some(name) = &tc.function.name
            {
                builder.name = name.to_ascii_lowercase();
            }

            let fragment = tc.function.arguments.clone().unwrap_or_default();
            builder.arguments.push_str(&fragment);

            // Signal the call as soon as it opens, even with no arguments yet.
            if is_new || !fragment.is_empty() {
                deltas.tool_call_updates.push(ToolCallUpdate {
                    tool_call_id: builder.id.clone(),
                    name: builder.name.clone(),
                    arguments_delta: fragment,
                });
            }
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
                    state.content.push_str(text);
                    state.raw_content.push_str(text);
                    deltas.content = Some(text.to_string());
                }
            }
            "response.reasoning_summary_text.delta" => {
                let text = chunk.str_field("delta");
                if !text.is_empty() {
                    state.reasoning.push_str(text);
                    deltas.reasoning = Some(text.to_string());
                }
            }
            "response.output_item.added" => {
                if let Some(item) = chunk.item()
                    && item.get("type").and_then(|v| v.as_str()) == Some("function_call")
                {
                    let call_id = item
                        .get("call_id")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .unwrap_or_else(|| state.synthesize_call_id());
                    let name = item
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_ascii_lowercase();
                    let item_id = item
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&call_id)
                        .to_string();

                    let slot = state.tool_calls.len();
                    state.tool_calls.push(ToolCallBuilder {
                        id: call_id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    });
                    state.item_slots.insert(item_id, slot);
                    deltas.tool_call_updates.push(ToolCallUpdate {
                        tool_call_id: call_id,
                        name,
                        arguments_delta: String::new(),
                    });
                }
            }
            "response.function_call_arguments.delta" => {
                let item_id = chunk.str_field("item_id").to_string();
                let fragment = chunk.str_field("delta").to_string();
                if let Some(slot) = state.item_slots.get(&item_id).copied()
                    && !fragment.is_empty()
                {
                    let builder = &mut state.tool_calls[slot];
                    builder.arguments.push_str(&fragment);
                    deltas.tool_call_updates.push(ToolCallUpdate {
                        tool_call_id: builder.id.clone(),
                        name: builder.name.clone(),
                        arguments_delta: fragment,
                    });
                }
            }
            "response.completed" => {
                if let Some(response) = chunk.response() {
                    if let Some(id) = response.get("id").and_then(|v| v.as_str()) {
                        state.response_id = Some(id.to_string());
                    }
                }
                state.finish_reason = Some(if state.tool_calls.is_empty() {
                    "stop".to_string()
                } else {
                    "tool_calls".to_string()
                });
            }
            _ => {}
        }

        deltas
    }

    fn finalize(&self, state: StreamState) -> FinalizedTurn {
        let mut tool_calls = Vec::with_capacity(state.tool_calls.len());
        for builder in state.tool_calls {
            if builder.name.is_empty() {
                tracing::warn!(id = %builder.id, "Dropping tool call with no name");
                continue;
            }
            let arguments = if builder.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                builder.arguments
            };
            let call = ToolCall::new(builder.id, builder.name, arguments);
            if call.parse_arguments().is_err() {
                // Stream ended mid-call; surface the raw text, report no call.
                tracing::warn!(
                    id = %call.id,
                    name = %call.name,
                    "Dropping tool call with unparseable arguments"
                );
                continue;
            }
            tool_calls.push(call);
        }

        FinalizedTurn {
            content: state.content,
            raw_content: state.raw_content,
            tool_calls,
            reasoning: (!state.reasoning.is_empty()).then_some(state.reasoning),
            finish_reason: state.finish_reason,
            response_id: state.response_id,
        }
    }

    fn assistant_history_entry(&self, content: &str, tool_calls: &[ToolCall]) -> ChatMessage {
        let wire_calls = tool_calls
            .iter()
            .map(|call| ChatToolCall::function(&call.id, &call.name, call.arguments.clone()))
            .collect();
        ChatMessage::assistant_tool_calls(
            (!content.is_empty()).then(|| content.to_string()),
            wire_calls,
        )
    }

    fn tool_result_history_entries(&self, record: &ToolResultRecord) -> Vec<ChatMessage> {
        let text = serde_json::to_string(&record.content).unwrap_or_else(|_| "{}".to_string());
        let mut entries = vec![ChatMessage::tool_result(&record.tool_call_id, text)];

        // Chat completions reject images inside tool responses; forward the
        // payload as a follow-up user message instead.
        if let Some(image) = &record.image {
            entries.push(ChatMessage::user_parts(vec![
                ChatContentPart::image_data_url(&image.mime_type, &image.data),
            ]));
        }

        entries
    }
}
