//! Axon agent runtime (loop controller, stream processors, tool engines).

pub mod config;
pub mod core;
pub mod engine;
pub mod prompts;
pub mod providers;
pub mod tools;

pub use axon_types as types;

pub use config::AgentConfig;
pub use core::abort::AbortSignal;
pub use core::event_stream::EventStream;
pub use core::hooks::{AgentHooks, NoopHooks, RequestPreparation};
pub use core::runner::{Agent, AgentBuilder, EnvironmentInput, RunInput, RunRequest, RunResult};
pub use engine::{EngineKind, ToolCallEngine};
pub use providers::{HttpLlmClient, LlmClient, ResolvedModel};
pub use tools::{ToolContext, ToolProvider, ToolRegistry};
