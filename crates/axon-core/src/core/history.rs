//! Message history: the LLM-ready view of the event stream.
//!
//! Derived and read-only — recomputed per request from the authoritative
//! event log, never stored independently. Tool call/result serialization is
//! delegated to the active engine, since native and prompt-engineered
//! engines disagree on the representation.

use axon_types::{ContentPart, Event, EventKind};

use crate::engine::{ToolCallEngine, ToolResultRecord};
use crate::providers::chat::{ChatContentPart, ChatMessage, ChatMessageContent};

/// Placeholder left where an image was dropped by compaction.
const IMAGE_OMITTED_PLACEHOLDER: &str = "[image omitted: history image limit]";

/// Reserved room for the elision marker inside a truncated text.
const ELISION_MARKER_ROOM: usize = 48;

/// Builds provider message lists from the event log, applying compaction.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    max_images: usize,
    max_text_len: usize,
}

impl MessageHistory {
    pub fn new(max_images: usize, max_text_len: usize) -> Self {
        Self {
            max_images,
            max_text_len,
        }
    }

    /// Folds the event log into role-tagged messages and compacts them.
    pub fn to_messages(&self, events: &[Event], engine: &dyn ToolCallEngine) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        for event in events {
            match &event.kind {
                EventKind::UserMessage { content } => {
                    if let Some(message) = user_message_from_parts(content, None) {
                        messages.push(message);
                    }
                }
                EventKind::EnvironmentInput {
                    content,
                    description,
                } => {
                    if let Some(message) = user_message_from_parts(content, description.as_deref())
                    {
                        messages.push(message);
                    }
                }
                EventKind::AssistantMessage {
                    content,
                    tool_calls,
                    ..
                } => {
                    if !content.is_empty() || !tool_calls.is_empty() {
                        messages.push(engine.assistant_history_entry(content, tool_calls));
                    }
                }
                EventKind::ToolResult {
                    tool_call_id,
                    name,
                    content,
                    is_error,
                    image,
                    ..
                } => {
                    let record = ToolResultRecord {
                        tool_call_id: tool_call_id.clone(),
                        name: name.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                        image: image.clone(),
                    };
                    messages.extend(engine.tool_result_history_entries(&record));
                }
                // Everything else (streaming deltas, run brackets, plan
                // events, thinking) is not replayed to the provider.
                _ => {}
            }
        }

        self.compact(&mut messages);
        messages
    }

    /// Applies both compaction passes. Idempotent: running it on an
    /// already-compacted history changes nothing.
    pub fn compact(&self, messages: &mut [ChatMessage]) {
        self.enforce_image_cap(messages);
        self.truncate_long_texts(messages);
    }

    /// Caps the number of image parts across the whole history, dropping
    /// oldest first.
    fn enforce_image_cap(&self, messages: &mut [ChatMessage]) {
        let total = messages.iter().map(count_images).sum::<usize>();
        let mut to_drop = total.saturating_sub(self.max_images);
        if to_drop == 0 {
            return;
        }

        for message in messages.iter_mut() {
            if to_drop == 0 {
                break;
            }
            if let Some(ChatMessageContent::Parts(parts)) = &mut message.content {
                for part in parts.iter_mut() {
                    if to_drop == 0 {
                        break;
                    }
                    if matches!(part, ChatContentPart::ImageUrl { .. }) {
                        *part = ChatContentPart::Text {
                            text: IMAGE_OMITTED_PLACEHOLDER.to_string(),
                        };
                        to_drop -= 1;
                    }
                }
            }
        }
    }

    /// Replaces the middle of any over-long text with an elision marker.
    fn truncate_long_texts(&self, messages: &mut [ChatMessage]) {
        for message in messages.iter_mut() {
            match &mut message.content {
                Some(ChatMessageContent::Text(text)) => {
                    if text.len() > self.max_text_len {
                        *text = truncate_middle(text, self.max_text_len);
                    }
                }
                Some(ChatMessageContent::Parts(parts)) => {
                    for part in parts.iter_mut() {
                        if let ChatContentPart::Text { text } = part
                            && text.len() > self.max_text_len
                        {
                            *text = truncate_middle(text, self.max_text_len);
                        }
                    }
                }
                None => {}
            }
        }
    }
}

fn count_images(message: &ChatMessage) -> usize {
    match &message.content {
        Some(ChatMessageContent::Parts(parts)) => parts
            .iter()
            .filter(|p| matches!(p, ChatContentPart::ImageUrl { .. }))
            .count(),
        _ => 0,
    }
}

/// Builds a user message from multimodal parts, collapsing text-only input
/// to a plain string for compatibility with non-multimodal endpoints.
fn user_message_from_parts(parts: &[ContentPart], description: Option<&str>) -> Option<ChatMessage> {
    let mut wire_parts = Vec::with_capacity(parts.len() + 1);
    if let Some(desc) = description
        && !desc.trim().is_empty()
    {
        wire_parts.push(ChatContentPart::Text {
            text: format!("Environment input: {desc}"),
        });
    }
    for part in parts {
        match part {
            ContentPart::Text { text } => {
                wire_parts.push(ChatContentPart::Text { text: text.clone() });
            }
            ContentPart::Image { mime_type, data } => {
                wire_parts.push(ChatContentPart::image_data_url(mime_type, data));
            }
        }
    }

    if wire_parts.is_empty() {
        return None;
    }

    let has_images = wire_parts
        .iter()
        .any(|p| matches!(p, ChatContentPart::ImageUrl { .. }));
    if has_images {
        return Some(ChatMessage::user_parts(wire_parts));
    }

    let combined = wire_parts
        .iter()
        .filter_map(|p| match p {
            ChatContentPart::Text { text } => Some(text.as_str()),
            ChatContentPart::ImageUrl { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(ChatMessage::user(combined))
}

/// Replaces the middle of `text` with an elision marker so the result fits
/// in `max_len` bytes, preserving UTF-8 boundaries.
fn truncate_middle(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let budget = max_len.saturating_sub(ELISION_MARKER_ROOM);
    let front_target = budget / 2;
    let back_target = budget - front_target;

    let front_end = floor_char_boundary(text, front_target);
    let back_start = ceil_char_boundary(text, text.len() - back_target);
    let elided = back_start - front_end;

    format!(
        "{}\n...[{} bytes elided]...\n{}",
        &text[..front_end],
        elided,
        &text[back_start..]
    )
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use axon_types::ToolCall;

    use super::*;
    use crate::core::event_stream::EventStream;
    use crate::engine::NativeEngine;

    fn history() -> MessageHistory {
        MessageHistory::new(2, 256)
    }

    fn stream_with_tool_turn() -> EventStream {
        let stream = EventStream::new("s1");
        stream.emit(EventKind::UserMessage {
            content: vec![ContentPart::text("What is the weather today?")],
        });
        stream.emit(EventKind::AssistantMessage {
            message_id: "m1".to_string(),
            content: String::new(),
            tool_calls: vec![ToolCall::new(
                "t1",
                "web_search",
                r#"{"query":"weather today"}"#,
            )],
            finish_reason: Some("tool_calls".to_string()),
            response_id: None,
        });
        stream.emit(EventKind::ToolResult {
            tool_call_id: "t1".to_string(),
            name: "web_search".to_string(),
            content: json!({"ok": true, "data": {"answer": "sunny"}}),
            is_error: false,
            elapsed_ms: 12,
            image: None,
        });
        stream.emit(EventKind::AssistantMessage {
            message_id: "m2".to_string(),
            content: "It is sunny.".to_string(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
            response_id: None,
        });
        stream
    }

    #[test]
    fn test_fold_produces_role_sequence() {
        let stream = stream_with_tool_turn();
        let messages = history().to_messages(&stream.events(), &NativeEngine);

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_streaming_and_plan_events_are_not_replayed() {
        let stream = EventStream::new("s1");
        stream.emit(EventKind::AssistantStreamingMessage {
            message_id: "m1".to_string(),
            delta: "partial".to_string(),
        });
        stream.emit(EventKind::PlanStart);

        let messages = history().to_messages(&stream.events(), &NativeEngine);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_environment_input_becomes_user_message() {
        let stream = EventStream::new("s1");
        stream.emit(EventKind::EnvironmentInput {
            content: vec![ContentPart::text("branch: main")],
            description: Some("git status".to_string()),
        });

        let messages = history().to_messages(&stream.events(), &NativeEngine);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        let text = match &messages[0].content {
            Some(ChatMessageContent::Text(text)) => text.clone(),
            other => panic!("unexpected content: {other:?}"),
        };
        assert!(text.contains("Environment input: git status"));
        assert!(text.contains("branch: main"));
    }

    #[test]
    fn test_image_cap_drops_oldest_first() {
        let stream = EventStream::new("s1");
        for i in 0..4 {
            stream.emit(EventKind::UserMessage {
                content: vec![
                    ContentPart::text(format!("shot {i}")),
                    ContentPart::image("image/png", "aGk="),
                ],
            });
        }

        let messages = history().to_messages(&stream.events(), &NativeEngine);
        let image_counts: Vec<usize> = messages.iter().map(count_images).collect();
        // Cap is 2: the two oldest images are replaced, the two newest stay.
        assert_eq!(image_counts, vec![0, 0, 1, 1]);

        let first_parts = match &messages[0].content {
            Some(ChatMessageContent::Parts(parts)) => parts,
            other => panic!("unexpected content: {other:?}"),
        };
        assert!(first_parts.iter().any(|p| matches!(
            p,
            ChatContentPart::Text { text } if text == IMAGE_OMITTED_PLACEHOLDER
        )));
    }

    #[test]
    fn test_long_text_gets_middle_elision() {
        let stream = EventStream::new("s1");
        let long = "x".repeat(2048);
        stream.emit(EventKind::UserMessage {
            content: vec![ContentPart::text(long)],
        });

        let messages = history().to_messages(&stream.events(), &NativeEngine);
        let text = match &messages[0].content {
            Some(ChatMessageContent::Text(text)) => text.clone(),
            other => panic!("unexpected content: {other:?}"),
        };
        assert!(text.len() <= 256);
        assert!(text.contains("bytes elided"));
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let stream = EventStream::new("s1");
        let long = "y".repeat(4096);
        for _ in 0..3 {
            stream.emit(EventKind::UserMessage {
                content: vec![
                    ContentPart::text(long.clone()),
                    ContentPart::image("image/png", "aGk="),
                ],
            });
        }

        let h = history();
        let mut messages = h.to_messages(&stream.events(), &NativeEngine);
        let once = messages.clone();
        h.compact(&mut messages);
        assert_eq!(messages, once);

        // Post-conditions: image count <= cap, all texts <= threshold.
        let total_images: usize = messages.iter().map(count_images).sum();
        assert!(total_images <= 2);
        for message in &messages {
            if let Some(ChatMessageContent::Parts(parts)) = &message.content {
                for part in parts {
                    if let ChatContentPart::Text { text } = part {
                        assert!(text.len() <= 256);
                    }
                }
            }
        }
    }

    #[test]
    fn test_truncate_middle_respects_utf8_boundaries() {
        let text = "é".repeat(300);
        let truncated = truncate_middle(&text, 128);
        assert!(truncated.len() <= 128);
        assert!(truncated.contains("bytes elided"));
    }
}
