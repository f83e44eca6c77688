//! Shared data model for the axon agent runtime (events, messages, tools).

pub mod event;
pub mod message;
pub mod plan;
pub mod tool;

pub use event::{Event, EventKind, RunError, RunStatus};
pub use message::ContentPart;
pub use plan::{Plan, PlanStep};
pub use tool::{ImageContent, ToolCall, ToolDefinition, ToolError, ToolOutput};
