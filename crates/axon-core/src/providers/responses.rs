//! Responses API streaming: typed-lite chunk model and SSE parsing.
//!
//! The Responses protocol streams one SSE event per semantic step
//! (`response.output_text.delta`, `response.output_item.added`, ...). The
//! chunk keeps the event name plus raw payload; the tool call engines do
//! the interpretation.

use std::collections::VecDeque;
use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde_json::Value;

use crate::providers::chat::SseTerminatedStream;
use crate::providers::{ProviderError, ProviderResult};

/// One streamed Responses API event.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsesChunk {
    /// Event name, e.g. `response.output_text.delta`.
    pub kind: String,
    /// Full event payload.
    pub data: Value,
}

impl ResponsesChunk {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Returns a string field from the payload, empty when absent.
    pub fn str_field(&self, key: &str) -> &str {
        self.data.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Returns the `item` object for output-item events.
    pub fn item(&self) -> Option<&Value> {
        self.data.get("item")
    }

    /// Returns the final `response` object for `response.completed`.
    pub fn response(&self) -> Option<&Value> {
        self.data.get("response")
    }
}

/// SSE parser yielding [`ResponsesChunk`]s.
pub struct ResponsesSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    pending: VecDeque<ProviderResult<ResponsesChunk>>,
}

impl<S> ResponsesSseParser<S> {
    pub fn new<E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            pending: VecDeque::new(),
        }
    }

    fn handle_event_data(&mut self, data: &str) {
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return;
        }

        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(err) => {
                self.pending.push_back(Err(ProviderError::parse(format!(
                    "Failed to parse SSE JSON: {err}"
                ))));
                return;
            }
        };

        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if kind == "error" || kind == "response.failed" {
            let message = value
                .get("message")
                .or_else(|| value.get("error").and_then(|e| e.get("message")))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            self.pending
                .push_back(Err(ProviderError::api_error(&kind, message)));
            return;
        }

        self.pending.push_back(Ok(ResponsesChunk::new(kind, value)));
    }
}

impl<S, E> Stream for ResponsesSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<ResponsesChunk>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => self.handle_event_data(&event.data),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ProviderError::parse(format!(
                        "SSE stream error: {e}"
                    )))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    fn byte_stream(
        body: &str,
    ) -> impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> + Unpin {
        futures_util::stream::iter(vec![Ok(bytes::Bytes::copy_from_slice(body.as_bytes()))])
    }

    #[tokio::test]
    async fn test_parses_typed_events() {
        let body = concat!(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
        );
        let chunks: Vec<_> = ResponsesSseParser::new(byte_stream(body)).collect().await;
        assert_eq!(chunks.len(), 2);

        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.kind, "response.output_text.delta");
        assert_eq!(first.str_field("delta"), "Hi");

        let second = chunks[1].as_ref().unwrap();
        assert_eq!(second.response().unwrap()["id"], "resp_1");
    }

    #[tokio::test]
    async fn test_failed_response_surfaces_as_err() {
        let body = "data: {\"type\":\"response.failed\",\"error\":{\"message\":\"quota\"}}\n\n";
        let chunks: Vec<_> = ResponsesSseParser::new(byte_stream(body)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].as_ref().unwrap_err().message.contains("quota"));
    }
}
