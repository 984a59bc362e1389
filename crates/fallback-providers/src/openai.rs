//! OpenAI-compatible chat completions provider.
//!
//! Works with any service exposing `POST {base_url}/chat/completions` with
//! bearer authentication (OpenAI, Groq, Together, vLLM, ...). Streaming uses
//! server-sent events terminated by `[DONE]`.

use crate::http::{build_client, check_status, map_request_error};
use async_stream::try_stream;
use async_trait::async_trait;
use fallback_core::{
    ChunkStream, GenerationContext, ProviderError, ProviderResult, ProviderTier, TextGenerator,
};
use futures_util::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default OpenAI API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Provider instance name
    pub name: String,
    /// API base URL, without trailing slash
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// API key
    pub api_key: SecretString,
    /// Pipeline tier
    pub tier: ProviderTier,
    /// Ceiling for a whole HTTP request
    pub timeout: Duration,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl OpenAiConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key,
            tier: ProviderTier::Primary,
            timeout: Duration::from_secs(60),
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

    /// Set the token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// OpenAI-compatible provider
pub struct OpenAiCompatibleProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider
    ///
    /// # Errors
    /// Returns a configuration error if the API key is blank or the HTTP
    /// client cannot be created
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(ProviderError::configuration(&config.name, "API key is empty"));
        }
        let client = build_client(&config.name, config.timeout)?;
        Ok(Self { config, client })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn build_request<'a>(&'a self, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn tier(&self) -> ProviderTier {
        self.config.tier
    }

    async fn invoke(&self, prompt: &str, _context: &GenerationContext) -> ProviderResult<String> {
        let name = &self.config.name;
        debug!(provider = %name, model = %self.config.model, "Sending chat completion request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&self.build_request(prompt, false))
            .send()
            .await
            .map_err(|e| map_request_error(name, self.config.timeout, &e))?;

        let response = check_status(name, response).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(name, format!("Failed to parse response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::invalid_response(name, "Response contained no content"))
    }

    async fn is_available(&self) -> bool {
        // Credentials are checked at construction; nothing else to probe.
        true
    }

    async fn stream(&self, prompt: &str, _context: &GenerationContext) -> ProviderResult<ChunkStream> {
        let name = self.config.name.clone();
        debug!(provider = %name, model = %self.config.model, "Starting streaming request");

        let request_builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&self.build_request(prompt, true));

        let mut event_source = EventSource::new(request_builder).map_err(|e| {
            ProviderError::transport(&name, format!("Failed to create event source: {e}"))
        })?;

        // Wait for the response head so status and connection failures
        // surface here, where the caller can still retry or move on.
        let pending = match event_source.next().await {
            Some(Ok(Event::Open)) => {
                trace!(provider = %name, "Stream opened");
                None
            }
            Some(Ok(Event::Message(msg))) => Some(msg.data),
            Some(Err(e)) => {
                event_source.close();
                return Err(stream_error(&name, self.config.timeout, e));
            }
            None => {
                return Err(ProviderError::transport(&name, "Stream closed before opening"));
            }
        };
        let timeout = self.config.timeout;

        let stream = try_stream! {
            let mut es = event_source;
            let mut pending = pending;

            loop {
                let next = match pending.take() {
                    Some(data) => Some(data),
                    None => next_data(&mut es).await.map_err(|e| {
                        warn!(provider = %name, error = %e, "Stream error");
                        stream_error(&name, timeout, e)
                    })?,
                };
                let data = match next {
                    Some(data) => data,
                    None => break,
                };

                let data = data.trim();
                if data == "[DONE]" {
                    break;
                }

                let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
                    ProviderError::invalid_response(&name, format!("Malformed stream chunk: {e}"))
                })?;
                if let Some(text) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|t| !t.is_empty())
                {
                    yield text;
                }
            }

            es.close();
        };

        Ok(Box::pin(stream))
    }
}

/// Next message payload; `None` once the server ends the stream.
async fn next_data(es: &mut EventSource) -> Result<Option<String>, reqwest_eventsource::Error> {
    while let Some(event) = es.next().await {
        match event {
            Ok(Event::Open) => {}
            Ok(Event::Message(msg)) => return Ok(Some(msg.data)),
            Err(reqwest_eventsource::Error::StreamEnded) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn stream_error(provider: &str, timeout: Duration, err: reqwest_eventsource::Error) -> ProviderError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => {
            warn!(provider = %provider, status = %status, "Stream rejected");
            ProviderError::transport(provider, format!("HTTP {}", status.as_u16()))
        }
        reqwest_eventsource::Error::Transport(e) => map_request_error(provider, timeout, &e),
        other => ProviderError::transport(provider, format!("Stream error: {other}")),
    }
}

// ============================================================================
// Chat completions wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
