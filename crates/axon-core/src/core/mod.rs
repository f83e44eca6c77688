//! Core runtime: event stream, processors, loop controller.
//!
//! - `event_stream`: append-only pub/sub log, the source of truth
//! - `history`: LLM-ready message view of the event log
//! - `llm_processor`: one iteration's request/stream/finalize cycle
//! - `tool_processor`: concurrent tool execution with result correlation
//! - `runner`: the agent loop controller and run surface
//! - `reflection`: second-guessing of candidate final answers
//! - `abort`: per-run cancellation signal
//! - `hooks`: collaborator seams
//! - `plan`: plan event helpers
//! - `persistence`: durable JSONL event log

pub mod abort;
pub mod event_stream;
pub mod hooks;
pub mod history;
pub mod llm_processor;
pub mod persistence;
pub mod plan;
pub mod reflection;
pub mod runner;
pub mod tool_processor;
