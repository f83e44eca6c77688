//! OpenAI-compatible Chat Completions wire types and SSE parsing.

use std::collections::VecDeque;
use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::{ProviderError, ProviderResult};

/// A chat-completion-style request payload.
///
/// `stream` is always set by the runtime; the non-streaming path only
/// exists for the reflection call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// Responses API only: provider-side context continuation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            stream: true,
            messages,
            tools: None,
            temperature: None,
            max_tokens: None,
            response_format: None,
            previous_response_id: None,
        }
    }
}

/// A role-tagged wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatMessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text("system", text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text("assistant", text)
    }

    pub fn user_parts(parts: Vec<ChatContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(ChatMessageContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates an assistant message carrying native tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ChatToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.map(ChatMessageContent::Text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Creates a `tool` role message answering one tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(ChatMessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(ChatMessageContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Message content - either a simple string or an array of content parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatMessageContent {
    /// Simple text content (serializes as a string)
    Text(String),
    /// Multi-part content with text and images (serializes as an array)
    Parts(Vec<ChatContentPart>),
}

/// Content part for multi-part messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    /// Text content part
    Text { text: String },
    /// Image URL content part (supports base64 data URLs)
    ImageUrl { image_url: ImageUrlData },
}

impl ChatContentPart {
    /// Builds an image part from a MIME type and base64 data.
    pub fn image_data_url(mime_type: &str, data: &str) -> Self {
        ChatContentPart::ImageUrl {
            image_url: ImageUrlData {
                url: format!("data:{mime_type};base64,{data}"),
            },
        }
    }
}

/// Image URL data structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrlData {
    pub url: String,
}

/// Native tool call in an assistant wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: ChatToolCallFunction,
}

impl ChatToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: String) -> Self {
        Self {
            id: id.into(),
            tool_type: "function",
            function: ChatToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// Function schema advertised in the request `tools` field.
#[derive(Debug, Clone, Serialize)]
pub struct ChatToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: ChatToolFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&axon_types::ToolDefinition> for ChatToolDefinition {
    fn from(tool: &axon_types::ToolDefinition) -> Self {
        // Lowercase names are the least-surprising form across providers.
        let tool = tool.with_lowercase_name();
        Self {
            tool_type: "function",
            function: ChatToolFunction {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        }
    }
}

// ============================================================================
// Streaming chunk model
// ============================================================================

/// One parsed SSE chunk of a streamed chat completion.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunkChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental delta inside a chunk choice.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning stream; providers disagree on the field name.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ChatDelta {
    /// Returns the reasoning delta regardless of which field carried it.
    pub fn effective_reasoning(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Structured tool-call delta: index, optional id/name, argument fragment.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: ToolCallFunctionDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Non-streaming chat completion (reflection path).
#[derive(Debug, Clone, Default)]
pub struct ChatCompletion {
    pub content: String,
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    /// Extracts the first choice's message content from a response body.
    ///
    /// # Errors
    /// Returns a parse error when the body is not valid completion JSON.
    pub fn from_response_body(body: &str) -> ProviderResult<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|err| ProviderError::parse(format!("Failed to parse completion: {err}")))?;
        let choice = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| ProviderError::parse("Completion response has no choices"))?;
        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let finish_reason = choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(ToString::to_string);
        Ok(Self {
            content,
            finish_reason,
        })
    }
}

// ============================================================================
// SSE parsing
// ============================================================================

/// Appends a blank line when the byte stream ends, so the SSE decoder
/// flushes an unterminated final event.
pub(crate) struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
{
    type Item = std::result::Result<bytes::Bytes, E>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(bytes::Bytes::from_static(b"\n\n"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// SSE parser yielding [`ChatChunk`]s from a chat-completions byte stream.
///
/// Mid-stream `{"error": ...}` payloads surface as `Err` items; `[DONE]`
/// and empty keepalives are skipped.
pub struct ChatSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    pending: VecDeque<ProviderResult<ChatChunk>>,
}

impl<S> ChatSseParser<S> {
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

        if let Some(error) = value.get("error") {
            let error_type = error
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("error");
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            self.pending
                .push_back(Err(ProviderError::api_error(error_type, message)));
            return;
        }

        match serde_json::from_value::<ChatChunk>(value) {
            Ok(chunk) => self.pending.push_back(Ok(chunk)),
            Err(err) => self.pending.push_back(Err(ProviderError::parse(format!(
                "Unexpected chunk shape: {err}"
            )))),
        }
    }
}

impl<S, E> Stream for ChatSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<ChatChunk>;

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
        // One byte per item exercises chunk-boundary handling in the decoder.
        let bytes: Vec<_> = body
            .as_bytes()
            .iter()
            .map(|b| Ok(bytes::Bytes::copy_from_slice(&[*b])))
            .collect();
        futures_util::stream::iter(bytes)
    }

    #[tokio::test]
    async fn test_parses_content_chunks() {
        let body = concat!(
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks: Vec<_> = ChatSseParser::new(byte_stream(body)).collect().await;
        assert_eq!(chunks.len(), 2);

        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.choices[0].delta.content.as_deref(), Some("Hel"));

        let second = chunks[1].as_ref().unwrap();
        assert_eq!(second.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_parses_tool_call_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"t1\",\"function\":{\"name\":\"search\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"q\\\":1}\"}}]}}]}\n\n",
        );
        let chunks: Vec<_> = ChatSseParser::new(byte_stream(body)).collect().await;
        assert_eq!(chunks.len(), 2);

        let first = chunks[0].as_ref().unwrap();
        let delta = &first.choices[0].delta.tool_calls[0];
        assert_eq!(delta.id.as_deref(), Some("t1"));
        assert_eq!(delta.function.name.as_deref(), Some("search"));

        let second = chunks[1].as_ref().unwrap();
        assert_eq!(
            second.choices[0].delta.tool_calls[0]
                .function
                .arguments
                .as_deref(),
            Some(r#"{"q":1}"#)
        );
    }

    #[tokio::test]
    async fn test_mid_stream_error_surfaces_as_err() {
        let body = "data: {\"error\":{\"type\":\"overloaded\",\"message\":\"busy\"}}\n\n";
        let chunks: Vec<_> = ChatSseParser::new(byte_stream(body)).collect().await;
        assert_eq!(chunks.len(), 1);
        let err = chunks[0].as_ref().unwrap_err();
        assert!(err.message.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_unterminated_final_event_is_flushed() {
        // No trailing blank line after the last event.
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}";
        let chunks: Vec<_> = ChatSseParser::new(byte_stream(body)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].as_ref().unwrap().choices[0].delta.content.as_deref(),
            Some("end")
        );
    }

    #[test]
    fn test_effective_reasoning_prefers_reasoning_content() {
        let delta = ChatDelta {
            reasoning_content: Some("a".to_string()),
            reasoning: Some("b".to_string()),
            ..Default::default()
        };
        assert_eq!(delta.effective_reasoning(), Some("a"));

        let delta = ChatDelta {
            reasoning: Some("b".to_string()),
            ..Default::default()
        };
        assert_eq!(delta.effective_reasoning(), Some("b"));
    }

    #[test]
    fn test_completion_from_response_body() {
        let body = r#"{"choices":[{"message":{"content":"hi"},"finish_reason":"stop"}]}"#;
        let completion = ChatCompletion::from_response_body(body).unwrap();
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));

        assert!(ChatCompletion::from_response_body("{}").is_err());
    }
}
