//! Ollama provider for local inference.
//!
//! Uses `POST /api/generate`; streaming responses are newline-delimited JSON
//! objects ending with `"done": true`. Availability is probed with
//! `GET /api/tags`, which is cheap but still a network round trip.

use crate::http::{build_client, check_status, map_request_error};
use async_stream::try_stream;
use async_trait::async_trait;
use fallback_core::{
    ChunkStream, GenerationContext, ProbeKind, ProviderError, ProviderResult, ProviderTier,
    TextGenerator,
};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default Ollama daemon URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Provider instance name
    pub name: String,
    /// Daemon base URL, without trailing slash
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Pipeline tier
    pub tier: ProviderTier,
    /// Ceiling for a whole HTTP request
    pub timeout: Duration,
    /// Timeout for the availability probe
    pub probe_timeout: Duration,
    /// Maximum tokens to generate (`num_predict`)
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl OllamaConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            tier: ProviderTier::Local,
            timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(2),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the tier
    #[must_use]
    pub fn with_tier(mut self, tier: ProviderTier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the HTTP request ceiling
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Ollama provider
pub struct OllamaProvider {
    config: OllamaConfig,
    client: Client,
}

impl OllamaProvider {
    /// Create a new provider
    pub fn new(config: OllamaConfig) -> ProviderResult<Self> {
        let client = build_client(&config.name, config.timeout)?;
        Ok(Self { config, client })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn build_request<'a>(&'a self, prompt: &'a str, stream: bool) -> GenerateRequest<'a> {
        let options = (self.config.temperature.is_some() || self.config.max_tokens.is_some())
            .then(|| GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            });
        GenerateRequest {
            model: &self.config.model,
            prompt,
            stream,
            options,
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn tier(&self) -> ProviderTier {
        self.config.tier
    }

    fn probe_kind(&self) -> ProbeKind {
        ProbeKind::Network
    }

    async fn invoke(&self, prompt: &str, _context: &GenerationContext) -> ProviderResult<String> {
        let name = &self.config.name;
        debug!(provider = %name, model = %self.config.model, "Sending generate request");

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .json(&self.build_request(prompt, false))
            .send()
            .await
            .map_err(|e| map_request_error(name, self.config.timeout, &e))?;

        let response = check_status(name, response).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(name, format!("Failed to parse response: {e}")))?;

        if let Some(error) = body.error {
            return Err(ProviderError::transport(name, error));
        }
        body.response
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::invalid_response(name, "Response contained no text"))
    }

    async fn is_available(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .timeout(self.config.probe_timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(provider = %self.config.name, status = %resp.status(), "Ollama probe failed");
                false
            }
            Err(e) => {
                debug!(provider = %self.config.name, error = %e, "Ollama unreachable");
                false
            }
        }
    }

    async fn stream(&self, prompt: &str, _context: &GenerationContext) -> ProviderResult<ChunkStream> {
        let name = self.config.name.clone();
        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .json(&self.build_request(prompt, true))
            .send()
            .await
            .map_err(|e| map_request_error(&name, self.config.timeout, &e))?;
        let response = check_status(&name, response).await?;
        let timeout = self.config.timeout;

        let stream = try_stream! {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes; a multi-byte character may straddle two chunks.
            let mut buffer: Vec<u8> = Vec::new();
            let mut exhausted = false;

            while !exhausted {
                match byte_stream.next().await {
                    Some(chunk) => {
                        let chunk = chunk.map_err(|e| map_request_error(&name, timeout, &e))?;
                        buffer.extend_from_slice(&chunk);
                    }
                    None => {
                        exhausted = true;
                        buffer.push(b'\n');
                    }
                }

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let part = match parse_stream_line(&name, &line)? {
                        Some(part) => part,
                        None => continue,
                    };
                    if let Some(error) = part.error {
                        Err(ProviderError::transport(&name, error))?;
                    }
                    if let Some(text) = part.response.filter(|t| !t.is_empty()) {
                        yield text;
                    }
                    if part.done {
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Decode one complete NDJSON line; blank lines yield `None`.
fn parse_stream_line(provider: &str, line: &[u8]) -> ProviderResult<Option<GenerateResponse>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line).map(Some).map_err(|e| {
        ProviderError::invalid_response(provider, format!("Malformed stream line: {e}"))
    })
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallback_core::ErrorKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> OllamaProvider {
        OllamaProvider::new(
            OllamaConfig::new("ollama", "llama3")
                .with_base_url(base_url)
                .with_probe_timeout(Duration::from_millis(200)),
        )
        .expect("valid provider")
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"model": "llama3", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "response": "ETH is flat.",
                "done": true
            })))
            .mount(&server)
            .await;

        let text = provider(&server.uri())
            .invoke("Analyze ETH", &GenerationContext::new())
            .await
            .expect("success");
        assert_eq!(text, "ETH is flat.");
    }

    #[tokio::test]
    async fn test_error_payload_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "model 'llama3' not found"
            })))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .invoke("Analyze ETH", &GenerationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        assert_eq!(p.probe_kind(), ProbeKind::Network);
        assert!(p.is_available().await);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        // Nothing listens on the discard port
        assert!(!provider("http://127.0.0.1:9").is_available().await);
    }

    #[tokio::test]
    async fn test_stream_ndjson() {
        let server = MockServer::start().await;
        let body = [
            r#"{"response":"ETH ","done":false}"#,
            r#"{"response":"is ","done":false}"#,
            r#"{"response":"flat.","done":false}"#,
            r#"{"response":"","done":true}"#,
        ]
        .join("\n")
            + "\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let stream = provider(&server.uri())
            .stream("Analyze ETH", &GenerationContext::new())
            .await
            .expect("stream opens");
        let text: String = stream.map(|c| c.expect("chunk")).collect::<Vec<_>>().await.concat();

        assert_eq!(text, "ETH is flat.");
    }

    #[tokio::test]
    async fn test_stream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = provider(&server.uri())
            .stream("Analyze ETH", &GenerationContext::new())
            .await;
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Transport));
    }

    /// Serve one request, writing the body in the given pieces.
    async fn serve_in_pieces(pieces: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read request");
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\nconnection: close\r\n\r\n")
                .await
                .expect("write head");
            for piece in pieces {
                socket.write_all(&piece).await.expect("write piece");
                socket.flush().await.expect("flush");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        format!("http://{addr}")
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= end + 4 + length
    }

    #[tokio::test]
    async fn test_stream_keeps_characters_split_across_chunks() {
        let line = "{\"response\":\"caf\u{e9} cr\u{e8}me\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n";
        let bytes = line.as_bytes();
        // Cut between the two bytes of the first 'é' (0xC3 0xA9)
        let split = bytes.iter().position(|&b| b == 0xC3).expect("multi-byte char") + 1;
        let base_url = serve_in_pieces(vec![bytes[..split].to_vec(), bytes[split..].to_vec()]).await;

        let stream = provider(&base_url)
            .stream("Dessert?", &GenerationContext::new())
            .await
            .expect("stream opens");
        let text: String = stream.map(|c| c.expect("chunk")).collect::<Vec<_>>().await.concat();

        assert_eq!(text, "caf\u{e9} cr\u{e8}me");
        assert!(!text.contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn test_stream_final_line_without_newline() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"ETH \",\"done\":false}\n{\"response\":\"up\",\"done\":true}";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let stream = provider(&server.uri())
            .stream("Analyze ETH", &GenerationContext::new())
            .await
            .expect("stream opens");
        let text: String = stream.map(|c| c.expect("chunk")).collect::<Vec<_>>().await.concat();

        assert_eq!(text, "ETH up");
    }
}
