//! Tool execution: resolves, runs, and correlates tool calls.
//!
//! Tool calls from a single model turn run concurrently; completion order
//! is not guaranteed, but every call yields exactly one `tool_result`
//! event carrying the originating `tool_call_id`.

use std::time::Instant;

use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;

use axon_types::{EventKind, ToolCall, ToolOutput};

use crate::core::llm_processor::IterationContext;

/// Executes all finalized tool calls of one turn.
///
/// On abort: already-finished calls keep their real results, everything
/// still in flight resolves to a canceled envelope immediately — the loop
/// does not block shutdown on non-cancellable tools.
pub async fn process_tool_calls(ctx: &IterationContext<'_>, calls: &[ToolCall]) {
    let mut in_flight: FuturesUnordered<_> = calls
        .iter()
        .enumerate()
        .map(|(index, call)| execute_one(ctx, index, call))
        .collect();

    let mut completed = vec![false; calls.len()];

    loop {
        tokio::select! {
            biased;
            () = ctx.abort.wait() => {
                // Drain whatever already resolved without waiting for the rest.
                while let Some(Some((index, output, elapsed_ms))) = in_flight.next().now_or_never() {
                    emit_result(ctx, &calls[index], &output, elapsed_ms);
                    completed[index] = true;
                }
                break;
            }
            next = in_flight.next() => match next {
                Some((index, output, elapsed_ms)) => {
                    emit_result(ctx, &calls[index], &output, elapsed_ms);
                    completed[index] = true;
                }
                None => break,
            },
        }
    }

    // Exactly one result per call, even for work cut short by the abort.
    for (index, call) in calls.iter().enumerate() {
        if !completed[index] {
            let output = ToolOutput::canceled("Run aborted");
            emit_result(ctx, call, &output, 0);
        }
    }
}

async fn execute_one(
    ctx: &IterationContext<'_>,
    index: usize,
    call: &ToolCall,
) -> (usize, ToolOutput, u64) {
    let started = Instant::now();

    // Interception lets a host mock or short-circuit specific calls.
    let arguments = match call.parse_arguments() {
        Ok(arguments) => arguments,
        Err(err) => {
            tracing::warn!(id = %call.id, name = %call.name, %err, "Malformed tool arguments");
            let output = ToolOutput::failure(
                "invalid_arguments",
                format!("Failed to parse tool arguments: {err}"),
                Some(truncate_for_error(&call.arguments, 500)),
            );
            return (index, output, elapsed_ms(started));
        }
    };

    if let Some(output) = ctx.hooks.intercept_tool_call(call, &arguments).await {
        return (index, output, elapsed_ms(started));
    }

    let output = ctx
        .tools
        .execute_tool(&call.name, &arguments, ctx.tool_ctx)
        .await;
    (index, output, elapsed_ms(started))
}

fn emit_result(ctx: &IterationContext<'_>, call: &ToolCall, output: &ToolOutput, elapsed_ms: u64) {
    let content: Value = output.to_json_value();
    ctx.stream.emit(EventKind::ToolResult {
        tool_call_id: call.id.clone(),
        name: call.name.clone(),
        content,
        is_error: !output.is_ok(),
        elapsed_ms,
        image: output.image().cloned(),
    });
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Truncates a string for error reporting to avoid bloating the model
/// context.
fn truncate_for_error(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &s[..end], s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_error() {
        assert_eq!(truncate_for_error("short", 100), "short");
        let truncated = truncate_for_error(&"x".repeat(600), 500);
        assert!(truncated.contains("600 total bytes"));
        assert!(truncated.len() < 600);
    }
}
