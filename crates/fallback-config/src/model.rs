//! Configuration model.

use crate::error::{ConfigError, Result};
use fallback_core::ProviderTier;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Candidate providers, in registration order.
    pub providers: Vec<ProviderConfig>,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerSettings,
    /// Retry settings.
    pub retry: RetrySettings,
    /// Adaptive timeout settings.
    pub timeout: TimeoutSettings,
    /// Response cache settings.
    pub cache: CacheSettings,
    /// In-flight deduplication settings.
    pub dedup: DedupSettings,
    /// Pipeline settings.
    pub pipeline: PipelineSettings,
    /// Logging and metrics settings.
    pub telemetry: TelemetrySettings,
    /// Prompt templating settings.
    pub prompt: PromptSettings,
}

impl AppConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::validation(format!(
                    "Duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::validation(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }
        if self.circuit_breaker.cooldown_multiplier < 1.0 {
            return Err(ConfigError::validation(
                "circuit_breaker.cooldown_multiplier must be at least 1.0",
            ));
        }
        if self.circuit_breaker.max_cooldown < self.circuit_breaker.cooldown {
            return Err(ConfigError::validation(
                "circuit_breaker.max_cooldown must not be less than cooldown",
            ));
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::validation(
                "retry.max_retries must be greater than 0",
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::validation(
                "retry.max_delay must not be less than base_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::validation(
                "retry.jitter must be between 0.0 and 1.0",
            ));
        }

        if self.timeout.initial.is_zero() || self.timeout.max < self.timeout.initial {
            return Err(ConfigError::validation(
                "timeout.initial must be non-zero and not exceed timeout.max",
            ));
        }
        if self.timeout.growth_factor < 1.0 {
            return Err(ConfigError::validation(
                "timeout.growth_factor must be at least 1.0",
            ));
        }

        if self.cache.short_prompt_ttl <= self.cache.long_prompt_ttl {
            return Err(ConfigError::validation(
                "cache.short_prompt_ttl must be greater than cache.long_prompt_ttl",
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::validation(
                "cache.max_entries must be greater than 0",
            ));
        }

        if self.dedup.in_flight_ceiling.is_zero() {
            return Err(ConfigError::validation(
                "dedup.in_flight_ceiling must be non-zero",
            ));
        }

        Ok(())
    }

    /// Enabled providers, in registration order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

/// Kind of provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any service speaking the OpenAI chat completions protocol.
    OpenaiCompatible,
    /// A local Ollama daemon.
    Ollama,
}

impl ProviderKind {
    /// Base URL used when none is configured.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenaiCompatible => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

/// A single provider entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name, used in logs, metrics and answers.
    pub name: String,

    /// Backend kind.
    pub kind: ProviderKind,

    /// Priority tier.
    #[serde(default)]
    pub tier: ProviderTier,

    /// API base URL; defaults per kind.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model identifier.
    pub model: String,

    /// Inline API key.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Starting per-attempt timeout for this provider; overrides `timeout.initial`.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Maximum tokens to generate.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Whether the provider takes part in pipelines.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ProviderConfig {
    /// Create a provider entry with defaults for the optional fields.
    pub fn new(name: impl Into<String>, kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            tier: ProviderTier::default(),
            base_url: None,
            model: model.into(),
            api_key: None,
            api_key_env: None,
            timeout: None,
            max_tokens: None,
            temperature: None,
            enabled: true,
        }
    }

    /// Set the tier.
    #[must_use]
    pub fn with_tier(mut self, tier: ProviderTier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set an inline API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Base URL to use, without a trailing slash.
    #[must_use]
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Resolve the API key from `api_key`, then `api_key_env`.
    ///
    /// Blank values count as absent.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        if let Some(key) = &self.api_key {
            if !key.expose_secret().trim().is_empty() {
                return Some(key.clone());
            }
        }

        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|value| !value.trim().is_empty())
            .map(SecretString::new)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("Provider name is required"));
        }
        if self.name == fallback_core::LOCAL_PROVIDER {
            return Err(ConfigError::validation(format!(
                "Provider name '{}' is reserved",
                self.name
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::validation(format!(
                "Provider '{}' has no model",
                self.name
            )));
        }
        if let Some(url) = &self.base_url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::validation(format!(
                    "Provider '{}' has invalid base_url '{url}': {e}",
                    self.name
                ))
            })?;
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::validation(format!(
                    "Provider '{}' temperature must be between 0.0 and 2.0",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Base cooldown before a trial call.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Cooldown multiplier applied after a failed trial.
    pub cooldown_multiplier: f64,
    /// Upper bound for the grown cooldown.
    #[serde(with = "humantime_serde")]
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            cooldown_multiplier: 2.0,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per provider per request.
    pub max_retries: u32,
    /// Delay before the second attempt.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff cap.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter fraction (0.0 disables).
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: 0.0,
        }
    }
}

/// Adaptive timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Starting per-attempt timeout.
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    /// Upper bound.
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// Growth multiplier.
    pub growth_factor: f64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(120),
            growth_factor: 1.5,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Prompts up to this many characters are short.
    pub short_prompt_max_chars: usize,
    /// TTL for short prompts.
    #[serde(with = "humantime_serde")]
    pub short_prompt_ttl: Duration,
    /// TTL for long prompts and local-fallback answers.
    #[serde(with = "humantime_serde")]
    pub long_prompt_ttl: Duration,
    /// Capacity of the in-memory backend.
    pub max_entries: usize,
    /// Key namespace.
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            short_prompt_max_chars: 500,
            short_prompt_ttl: Duration::from_secs(3600),
            long_prompt_ttl: Duration::from_secs(600),
            max_entries: 10_000,
            key_prefix: "llm-fallback".to_string(),
        }
    }
}

/// In-flight deduplication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// Hard ceiling on a shared computation.
    #[serde(with = "humantime_serde")]
    pub in_flight_ceiling: Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            in_flight_ceiling: Duration::from_secs(180),
        }
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// How long a network availability probe result is reused.
    #[serde(with = "humantime_serde")]
    pub probe_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            probe_ttl: Duration::from_secs(60),
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Default log filter directive.
    pub log_level: String,
    /// Emit JSON logs instead of pretty text.
    pub json_logs: bool,
    /// Prefix for metric names.
    pub metrics_namespace: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_namespace: "llm_fallback".to_string(),
        }
    }
}

/// Prompt templating settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    /// Fixed preamble placed before the context and user message.
    pub system_preamble: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            system_preamble: "You are a concise market assistant. Answer using the data \
                              provided and say when information is missing."
                .to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}
