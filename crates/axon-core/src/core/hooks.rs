//! Collaborator hooks: the runtime calls outward, the host implements.
//!
//! Every hook has a no-op default, and every hook failure is survivable —
//! the processors log and fall back rather than abort the iteration.

use async_trait::async_trait;
use serde_json::Value;

use axon_types::{ToolCall, ToolDefinition, ToolOutput};

use crate::engine::FinalizedTurn;
use crate::providers::chat::ChatRequest;

/// Mutable request inputs a collaborator may rewrite per iteration
/// (e.g., dynamic tool filtering).
#[derive(Debug, Clone)]
pub struct RequestPreparation {
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

/// Hook set injected at agent construction. Tests supply fakes directly.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Invoked before each iteration. Failures are logged, never fatal.
    async fn on_iteration_start(&self, iteration: u32) -> anyhow::Result<()> {
        let _ = iteration;
        Ok(())
    }

    /// May rewrite system prompt and tools for this iteration. A failure
    /// falls back to the unmodified inputs.
    async fn prepare_request(
        &self,
        preparation: RequestPreparation,
    ) -> anyhow::Result<RequestPreparation> {
        Ok(preparation)
    }

    /// Observability only; never affects control flow.
    async fn on_llm_request(&self, request: &ChatRequest) {
        let _ = request;
    }

    /// Observability only; never affects control flow.
    async fn on_llm_response(&self, turn: &FinalizedTurn) {
        let _ = turn;
    }

    /// Returning `Some` short-circuits the tool with the given output
    /// (used by hosts to mock or intercept specific calls).
    async fn intercept_tool_call(&self, call: &ToolCall, arguments: &Value) -> Option<ToolOutput> {
        let _ = (call, arguments);
        None
    }
}

/// The default collaborator: every hook is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl AgentHooks for NoopHooks {}
