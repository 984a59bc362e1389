//! Build providers and pipelines from configuration.

use crate::ollama::{OllamaConfig, OllamaProvider};
use crate::openai::{OpenAiCompatibleProvider, OpenAiConfig};
use fallback_config::{AppConfig, ProviderConfig, ProviderKind};
use fallback_core::{ProviderError, ProviderResult, TextGenerator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Hard per-request ceiling for a provider's HTTP client.
///
/// Per-attempt deadlines belong to the adaptive timeout, which may grow up
/// to `max_timeout`; the client only stops requests that outlive that.
#[must_use]
pub fn request_ceiling(config: &ProviderConfig, max_timeout: Duration) -> Duration {
    config.timeout.map_or(max_timeout, |timeout| timeout.max(max_timeout))
}

/// Build a single provider from its configuration entry.
///
/// `max_timeout` is the largest per-attempt timeout the caller will ever
/// allow; see [`request_ceiling`].
///
/// # Errors
/// Returns a configuration error when the entry is unusable, e.g. an
/// OpenAI-compatible provider without a resolvable API key.
pub fn build_provider(
    config: &ProviderConfig,
    max_timeout: Duration,
) -> ProviderResult<Arc<dyn TextGenerator>> {
    let base_url = config.effective_base_url();
    let ceiling = request_ceiling(config, max_timeout);

    match config.kind {
        ProviderKind::OpenaiCompatible => {
            let api_key = config.resolve_api_key().ok_or_else(|| {
                let source = config
                    .api_key_env
                    .as_deref()
                    .map_or_else(|| "api_key".to_string(), |var| format!("api_key or ${var}"));
                ProviderError::configuration(&config.name, format!("No API key configured ({source})"))
            })?;

            let mut provider_config = OpenAiConfig::new(&config.name, &config.model, api_key)
                .with_base_url(base_url)
                .with_tier(config.tier)
                .with_timeout(ceiling);
            provider_config.max_tokens = config.max_tokens;
            provider_config.temperature = config.temperature;

            Ok(Arc::new(OpenAiCompatibleProvider::new(provider_config)?))
        }
        ProviderKind::Ollama => {
            let mut provider_config = OllamaConfig::new(&config.name, &config.model)
                .with_base_url(base_url)
                .with_tier(config.tier)
                .with_timeout(ceiling);
            provider_config.max_tokens = config.max_tokens;
            provider_config.temperature = config.temperature;

            Ok(Arc::new(OllamaProvider::new(provider_config)?))
        }
    }
}

/// Build every enabled provider, dropping the ones that fail to configure.
///
/// Configuration errors are logged here and never surface at request time.
#[must_use]
pub fn build_providers(config: &AppConfig) -> Vec<Arc<dyn TextGenerator>> {
    config
        .enabled_providers()
        .filter_map(|entry| match build_provider(entry, config.timeout.max) {
            Ok(provider) => {
                info!(provider = %entry.name, tier = %entry.tier, model = %entry.model, "Provider registered");
                Some(provider)
            }
            Err(e) => {
                warn!(
                    provider = %entry.name,
                    error_kind = %e.kind(),
                    error = %e,
                    "Provider excluded from pipeline"
                );
                None
            }
        })
        .collect()
}
