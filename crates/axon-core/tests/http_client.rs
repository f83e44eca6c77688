//! HTTP seam tests: SSE parsing and error classification against a mock
//! server.

use futures_util::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use axon_core::engine::{NativeEngine, ToolCallEngine};
use axon_core::providers::chat::{ChatMessage, ChatRequest};
use axon_core::providers::{
    HttpLlmClient, LlmClient, ProviderErrorKind, ProviderKind, ResolvedModel,
};

const SSE_CHAT_TEXT: &str = include_str!("fixtures/sse_chat_text.sse");
const SSE_CHAT_TOOL_CALL: &str = include_str!("fixtures/sse_chat_tool_call.sse");

fn text_sse(a: &str, b: &str) -> String {
    SSE_CHAT_TEXT
        .replace("{{TEXT_A}}", a)
        .replace("{{TEXT_B}}", b)
}

fn tool_call_sse(tool_id: &str, tool_name: &str, args_json: &str) -> String {
    SSE_CHAT_TOOL_CALL
        .replace("{{TOOL_ID}}", tool_id)
        .replace("{{TOOL_NAME}}", tool_name)
        .replace("{{ARGS_JSON}}", &escape_json(args_json))
}

fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

fn client_for(server: &MockServer) -> HttpLlmClient {
    HttpLlmClient::new(ResolvedModel {
        provider: ProviderKind::OpenAI,
        model: "gpt-test".to_string(),
        api_key: "sk-test".to_string(),
        base_url: server.uri(),
        supports_responses_api: true,
        supports_reasoning: true,
    })
}

fn request() -> ChatRequest {
    ChatRequest::new("gpt-test", vec![ChatMessage::user("hello")])
}

#[tokio::test]
async fn test_stream_chat_parses_text_fixture() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(sse_response(&text_sse("Hello, ", "world")))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut chunks = client.stream_chat(request()).await.unwrap();

    let engine = NativeEngine;
    let mut state = engine.new_state();
    while let Some(chunk) = chunks.next().await {
        engine.process_chunk(&chunk.unwrap(), &mut state);
    }
    let turn = engine.finalize(state);

    assert_eq!(turn.content, "Hello, world");
    assert!(turn.tool_calls.is_empty());
    assert_eq!(turn.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn test_stream_chat_parses_tool_call_fixture() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&tool_call_sse(
            "call_abc",
            "web_search",
            r#"{"query":"weather"}"#,
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut chunks = client.stream_chat(request()).await.unwrap();

    let engine = NativeEngine;
    let mut state = engine.new_state();
    while let Some(chunk) = chunks.next().await {
        engine.process_chunk(&chunk.unwrap(), &mut state);
    }
    let turn = engine.finalize(state);

    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].id, "call_abc");
    assert_eq!(turn.tool_calls[0].name, "web_search");
    assert_eq!(
        turn.tool_calls[0].parse_arguments().unwrap()["query"],
        "weather"
    );
    assert_eq!(turn.finish_reason.as_deref(), Some("tool_calls"));
}

#[tokio::test]
async fn test_http_error_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_string(r#"{"error":{"message":"rate limit exceeded"}}"#),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = match client.stream_chat(request()).await {
        Ok(_) => panic!("expected stream_chat to return an error"),
        Err(e) => e,
    };

    assert_eq!(err.kind, ProviderErrorKind::HttpStatus);
    assert!(err.message.contains("rate limit exceeded"));
}

#[tokio::test]
async fn test_complete_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"choices":[{"message":{"role":"assistant","content":"pong"},"finish_reason":"stop"}]}"#,
        ))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let completion = client.complete(request()).await.unwrap();
    assert_eq!(completion.content, "pong");
}

#[tokio::test]
async fn test_stream_responses_hits_responses_path() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n\n",
        "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_42\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(
            serde_json::json!({"previous_response_id": "resp_41"}),
        ))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut req = request();
    req.previous_response_id = Some("resp_41".to_string());
    let mut chunks = client.stream_responses(req).await.unwrap();

    let engine = NativeEngine;
    let mut state = engine.new_state();
    while let Some(chunk) = chunks.next().await {
        engine.process_response_chunk(&chunk.unwrap(), &mut state);
    }
    let turn = engine.finalize(state);

    assert_eq!(turn.content, "Hi");
    assert_eq!(turn.response_id.as_deref(), Some("resp_42"));
}
