//! Event taxonomy for the agent run log.
//!
//! Events are immutable once appended. Streaming variants exist only for
//! live observation; the consolidated variants are what gets persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ContentPart;
use crate::plan::PlanStep;
use crate::tool::{ImageContent, ToolCall};

/// An immutable, timestamped record on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id (UUID v4).
    pub id: String,
    /// Monotonic logical clock value, milliseconds.
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Streaming variants are excluded from durable persistence.
    pub fn is_streaming(&self) -> bool {
        self.kind.is_streaming()
    }
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A run has started; precedes every other event of the run.
    AgentRunStart {
        session_id: String,
        provider: String,
        model: String,
        max_iterations: u32,
    },

    /// A run has ended; fires exactly once per run, on every exit path.
    AgentRunEnd {
        session_id: String,
        status: RunStatus,
        iterations: u32,
        elapsed_ms: u64,
        /// Final (or best-available partial) assistant content.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RunError>,
    },

    /// Caller input that started an iteration chain.
    UserMessage { content: Vec<ContentPart> },

    /// Consolidated assistant turn; finalizes what the streaming events
    /// with the same `message_id` accumulated.
    AssistantMessage {
        message_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        /// Provider-side response id for context continuation.
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },

    /// Incremental assistant content delta.
    AssistantStreamingMessage { message_id: String, delta: String },

    /// Consolidated reasoning content for one assistant turn.
    AssistantThinkingMessage { message_id: String, content: String },

    /// Incremental reasoning delta.
    AssistantStreamingThinkingMessage { message_id: String, delta: String },

    /// Incremental tool-call argument delta.
    AssistantStreamingToolCall {
        message_id: String,
        tool_call_id: String,
        name: String,
        arguments_delta: String,
    },

    /// A finalized tool call ready for execution.
    ToolCall {
        tool_call_id: String,
        name: String,
        arguments: Value,
    },

    /// The result of executing a tool call; exactly one per `ToolCall`.
    ToolResult {
        tool_call_id: String,
        name: String,
        content: Value,
        is_error: bool,
        elapsed_ms: u64,
        /// Image payload for vision-capable models (e.g., a screenshot tool).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<ImageContent>,
    },

    /// Runtime notice surfaced to observers (warnings, provider errors).
    System {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Out-of-band environment context injected into the history.
    EnvironmentInput {
        content: Vec<ContentPart>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    PlanStart,

    PlanUpdate { steps: Vec<PlanStep> },

    PlanFinish {
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl EventKind {
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            EventKind::AssistantStreamingMessage { .. }
                | EventKind::AssistantStreamingThinkingMessage { .. }
                | EventKind::AssistantStreamingToolCall { .. }
        )
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Successful,
    MaxIterations,
    Aborted,
    Error,
}

impl RunStatus {
    pub fn is_successful(self) -> bool {
        matches!(self, RunStatus::Successful)
    }
}

/// Structured error surfaced to the caller instead of a raw exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serializes_snake_case_tag() {
        let event = Event {
            id: "e1".to_string(),
            timestamp_ms: 42,
            kind: EventKind::AssistantStreamingMessage {
                message_id: "m1".to_string(),
                delta: "hi".to_string(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"assistant_streaming_message""#));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_streaming_classification() {
        let streaming = EventKind::AssistantStreamingToolCall {
            message_id: "m".to_string(),
            tool_call_id: "t".to_string(),
            name: "search".to_string(),
            arguments_delta: "{".to_string(),
        };
        assert!(streaming.is_streaming());

        let final_msg = EventKind::AssistantMessage {
            message_id: "m".to_string(),
            content: "done".to_string(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
            response_id: None,
        };
        assert!(!final_msg.is_streaming());
    }

    #[test]
    fn test_run_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::MaxIterations).unwrap(),
            r#""max_iterations""#
        );
        assert!(RunStatus::Successful.is_successful());
        assert!(!RunStatus::Aborted.is_successful());
    }
}
