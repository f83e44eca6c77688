//! Tool registry and the collaborator seam for tool execution.
//!
//! The runtime ships no built-in tools; hosts register their own handlers
//! against the registry (or implement [`ToolProvider`] directly).

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use axon_types::{ToolDefinition, ToolOutput};

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root directory for file operations.
    pub root: PathBuf,
    /// Optional timeout for tool execution.
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(root: PathBuf, timeout: Option<Duration>) -> Self {
        Self { root, timeout }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: None,
        }
    }
}

/// Async tool handler function.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutput> + Send>>;
pub type ToolHandler = Arc<dyn Fn(&Value, &ToolContext) -> ToolFuture + Send + Sync>;

/// Collaborator seam: provides the tool set for an iteration and executes
/// resolved calls. The [`ToolRegistry`] is the default implementation;
/// tests and embedders may supply their own.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tools advertised to the model this iteration.
    async fn available_tools(&self) -> anyhow::Result<Vec<ToolDefinition>>;

    /// Executes a named tool. Must not panic; failures are envelopes.
    async fn execute_tool(&self, name: &str, arguments: &Value, ctx: &ToolContext) -> ToolOutput;
}

/// Tool registry (definitions + executors).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("definitions", &self.definitions)
            .field("handlers_len", &self.handlers.len())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition, handler: ToolHandler) -> Self {
        self.register(definition, handler);
        self
    }

    /// Registers a tool, replacing any existing tool with the same name
    /// (case-insensitive).
    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let name_lower = definition.name.to_ascii_lowercase();
        if let Some(pos) = self
            .definitions
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(&definition.name))
        {
            self.definitions.remove(pos);
        }
        self.definitions.push(definition);
        self.handlers.insert(name_lower, handler);
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.definitions
            .iter()
            .map(|t| t.name.to_lowercase())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn available_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
        Ok(self.definitions.clone())
    }

    async fn execute_tool(&self, name: &str, arguments: &Value, ctx: &ToolContext) -> ToolOutput {
        let name_lower = name.to_ascii_lowercase();
        let Some(handler) = self.handlers.get(&name_lower) else {
            return unknown_tool_output(name, &self.tool_names());
        };

        let future = handler(arguments, ctx);
        match ctx.timeout {
            Some(timeout) => tokio::time::timeout(timeout, future)
                .await
                .unwrap_or_else(|_| {
                    ToolOutput::failure(
                        "timeout",
                        format!("Tool {name_lower} timed out after {timeout:?}"),
                        None,
                    )
                }),
            None => future.await,
        }
    }
}

fn unknown_tool_output(name: &str, available: &[String]) -> ToolOutput {
    let mut available = available.to_vec();
    available.sort();
    ToolOutput::failure(
        "unknown_tool",
        format!("Unknown tool: {name}"),
        Some(format!("Available tools: {}", available.join(", "))),
    )
}
