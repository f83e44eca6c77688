//! LLM client seam: injectable trait plus the HTTP implementation.

use std::sync::OnceLock;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::providers::chat::{
    ChatChunk, ChatCompletion, ChatMessageContent, ChatRequest, ChatSseParser,
};
use crate::providers::responses::{ResponsesChunk, ResponsesSseParser};
use crate::providers::{ProviderError, ProviderErrorKind, ProviderResult, ResolvedModel};

/// Boxed stream of chat-completion chunks.
pub type ChatChunkStream = BoxStream<'static, ProviderResult<ChatChunk>>;
/// Boxed stream of Responses API chunks.
pub type ResponsesChunkStream = BoxStream<'static, ProviderResult<ResponsesChunk>>;

/// Provider client seam.
///
/// The runner and processors only see this trait; tests supply fakes.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Streams a chat-completion request.
    async fn stream_chat(&self, request: ChatRequest) -> ProviderResult<ChatChunkStream>;

    /// Streams a Responses API request.
    async fn stream_responses(&self, request: ChatRequest) -> ProviderResult<ResponsesChunkStream> {
        let _ = request;
        Err(ProviderError::new(
            ProviderErrorKind::ApiError,
            "Responses API not supported by this client",
        ))
    }

    /// Sends a non-streaming completion request (reflection path).
    async fn complete(&self, request: ChatRequest) -> ProviderResult<ChatCompletion>;
}

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
const RESPONSES_PATH: &str = "/responses";

/// HTTP client speaking OpenAI-compatible chat completions and the
/// Responses API.
pub struct HttpLlmClient {
    model: ResolvedModel,
    // Connection pool built on first use, reused across iterations.
    http: OnceLock<reqwest::Client>,
}

impl HttpLlmClient {
    pub fn new(model: ResolvedModel) -> Self {
        Self {
            model,
            http: OnceLock::new(),
        }
    }

    pub fn resolved_model(&self) -> &ResolvedModel {
        &self.model
    }

    fn http(&self) -> &reqwest::Client {
        self.http.get_or_init(reqwest::Client::new)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.model.api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers
    }

    async fn post_sse(&self, path: &str, body: &Value) -> ProviderResult<reqwest::Response> {
        let url = format!("{}{}", self.model.base_url, path);
        let response = self
            .http()
            .post(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn stream_chat(&self, request: ChatRequest) -> ProviderResult<ChatChunkStream> {
        let body = serde_json::to_value(&request)
            .map_err(|err| ProviderError::parse(format!("Failed to encode request: {err}")))?;
        let response = self.post_sse(CHAT_COMPLETIONS_PATH, &body).await?;
        Ok(ChatSseParser::new(response.bytes_stream()).boxed())
    }

    async fn stream_responses(&self, request: ChatRequest) -> ProviderResult<ResponsesChunkStream> {
        let body = responses_payload(&request);
        let response = self.post_sse(RESPONSES_PATH, &body).await?;
        Ok(ResponsesSseParser::new(response.bytes_stream()).boxed())
    }

    async fn complete(&self, request: ChatRequest) -> ProviderResult<ChatCompletion> {
        let mut request = request;
        request.stream = false;

        let url = format!("{}{}", self.model.base_url, CHAT_COMPLETIONS_PATH);
        let response = self
            .http()
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::http_status(status.as_u16(), &body));
        }
        ChatCompletion::from_response_body(&body)
    }
}

/// Maps a chat-shaped request onto the Responses API payload.
///
/// Tool schemas flatten into `{type, name, description, parameters}` items
/// and messages become `input` entries.
fn responses_payload(request: &ChatRequest) -> Value {
    let input: Vec<Value> = request
        .messages
        .iter()
        .map(|msg| {
            let text = match &msg.content {
                Some(ChatMessageContent::Text(text)) => text.clone(),
                Some(ChatMessageContent::Parts(parts)) => parts
                    .iter()
                    .filter_map(|part| match part {
                        crate::providers::chat::ChatContentPart::Text { text } => {
                            Some(text.as_str())
                        }
                        crate::providers::chat::ChatContentPart::ImageUrl { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => String::new(),
            };
            json!({"role": msg.role, "content": text})
        })
        .collect();

    let mut payload = json!({
        "model": request.model,
        "stream": true,
        "input": input,
    });

    if let Some(tools) = &request.tools {
        payload["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.function.parameters,
                    })
                })
                .collect(),
        );
    }
    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(previous) = &request.previous_response_id {
        payload["previous_response_id"] = json!(previous);
    }

    payload
}

fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::timeout(format!("Connection failed: {e}"))
    } else if e.is_request() {
        ProviderError::new(ProviderErrorKind::HttpStatus, format!("Request error: {e}"))
    } else {
        ProviderError::new(ProviderErrorKind::HttpStatus, format!("Network error: {e}"))
    }
}
