//! Test helper utilities for integration tests

use fallback_config::{AppConfig, ProviderConfig, ProviderKind};
use fallback_core::{MetricsSink, ProviderTier};
use fallback_orchestrator::FallbackOrchestrator;
use fallback_telemetry::RecordingMetrics;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Configuration with fast retries and no providers
pub fn base_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.max_retries = 2;
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(20);
    config.timeout.initial = Duration::from_secs(5);
    config.timeout.max = Duration::from_secs(10);
    config
}

/// OpenAI-compatible provider entry pointing at `base_url`
pub fn openai_entry(name: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig::new(name, ProviderKind::OpenaiCompatible, "gpt-4o-mini")
        .with_api_key("sk-test")
        .with_base_url(base_url)
}

/// Ollama provider entry pointing at `base_url`
pub fn ollama_entry(name: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig::new(name, ProviderKind::Ollama, "llama3")
        .with_tier(ProviderTier::Local)
        .with_base_url(base_url)
}

/// Build an orchestrator from `config`, recording metrics in memory
pub fn build(config: &AppConfig) -> (FallbackOrchestrator, Arc<RecordingMetrics>) {
    init_tracing();
    let metrics = Arc::new(RecordingMetrics::new());
    let orchestrator =
        FallbackOrchestrator::from_config(config, Arc::clone(&metrics) as Arc<dyn MetricsSink>);
    (orchestrator, metrics)
}
