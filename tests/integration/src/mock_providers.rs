//! Mock LLM providers for integration testing
//!
//! Provides wiremock-based mock servers that simulate OpenAI-compatible and
//! Ollama APIs.

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock OpenAI-compatible API server
pub struct MockOpenAI {
    pub server: MockServer,
}

impl MockOpenAI {
    /// Create a new mock server
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the provider with
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Successful completion, expected exactly `times` times
    pub async fn mock_completion(&self, content: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_response(content)))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Successful completion returned after `delay`, expected exactly `times` times
    pub async fn mock_completion_delayed(&self, content: &str, delay: Duration, times: u64) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(openai_chat_response(content))
                    .set_delay(delay),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Server error, expected exactly `times` times
    pub async fn mock_server_error(&self, times: u64) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(openai_error_response("server_error", "Internal server error")),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Server error for the first request only; later requests fall
    /// through to mocks mounted after this one
    pub async fn mock_server_error_once(&self) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(openai_error_response("server_error", "Internal server error")),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Successful completion with only whitespace content
    pub async fn mock_blank_completion(&self) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_response("   ")))
            .mount(&self.server)
            .await;
    }

    /// Server-sent event stream of `chunks`
    pub async fn mock_stream(&self, chunks: &[&str]) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(chunks), "text/event-stream"))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Number of requests the server received
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }

    /// Body of the first request the server received
    pub async fn first_request_body(&self) -> Option<Value> {
        let requests = self.server.received_requests().await?;
        requests.first().and_then(|r| r.body_json().ok())
    }
}

/// Mock Ollama API server
pub struct MockOllama {
    pub server: MockServer,
}

impl MockOllama {
    /// Create a new mock server
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the provider with
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Healthy daemon with one model installed
    pub async fn mock_tags(&self) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3:latest"}]})),
            )
            .mount(&self.server)
            .await;
    }

    /// Daemon that fails its health probe
    pub async fn mock_tags_down(&self) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&self.server)
            .await;
    }

    /// Successful generation, expected exactly `times` times
    pub async fn mock_generate(&self, content: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3",
                "response": content,
                "done": true
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

/// OpenAI chat completion response
pub fn openai_chat_response(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

/// OpenAI error response
pub fn openai_error_response(code: &str, message: &str) -> Value {
    json!({
        "error": {"message": message, "type": "api_error", "code": code}
    })
}

/// SSE body with one delta event per chunk, terminated by `[DONE]`
pub fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        let event = json!({"choices": [{"index": 0, "delta": {"content": chunk}}]});
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
