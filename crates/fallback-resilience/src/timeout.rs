//! Adaptive per-provider timeouts.
//!
//! Each provider starts with an initial timeout. When an attempt's observed
//! latency reaches the current timeout, the timeout for that provider grows
//! by `growth_factor` (bounded by `max`) so slow-but-healthy providers are
//! not starved by a fixed deadline.

use dashmap::DashMap;
use fallback_core::{metric_names, MetricsSink, NoopMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout applied to a provider's first attempt
    pub initial: Duration,
    /// Upper bound for the adapted timeout
    pub max: Duration,
    /// Multiplier applied when the timeout is exceeded
    pub growth_factor: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(120),
            growth_factor: 1.5,
        }
    }
}

/// Tracks the current timeout for each provider
pub struct TimeoutManager {
    config: TimeoutConfig,
    current: DashMap<String, Duration>,
    metrics: Arc<dyn MetricsSink>,
}

impl TimeoutManager {
    /// Create a new timeout manager
    #[must_use]
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            current: DashMap::new(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(TimeoutConfig::default())
    }

    /// Report adaptive timeout events to `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Seed a provider-specific starting timeout
    pub fn set_initial(&self, provider: &str, timeout: Duration) {
        self.current
            .insert(provider.to_string(), timeout.min(self.config.max));
    }

    /// Current timeout for a provider
    #[must_use]
    pub fn current(&self, provider: &str) -> Duration {
        self.current
            .get(provider)
            .map_or(self.config.initial, |entry| *entry.value())
    }

    /// Record an observed latency. Returns `true` when the timeout grew.
    pub fn observe(&self, provider: &str, latency: Duration) -> bool {
        let mut entry = self
            .current
            .entry(provider.to_string())
            .or_insert(self.config.initial);
        let current = *entry;

        if latency < current || current >= self.config.max {
            return false;
        }

        let grown = current
            .mul_f64(self.config.growth_factor.max(1.0))
            .min(self.config.max);
        *entry = grown;
        drop(entry);

        info!(
            event = "adaptive_timeout_triggered",
            provider = %provider,
            latency_ms = latency.as_millis() as u64,
            previous_timeout_ms = current.as_millis() as u64,
            timeout_ms = grown.as_millis() as u64,
            "Adaptive timeout increased"
        );
        self.metrics.increment(
            metric_names::ADAPTIVE_TIMEOUTS_TOTAL,
            &[("provider", provider)],
        );
        true
    }

    /// Forget any adaptation for a provider
    pub fn reset(&self, provider: &str) {
        self.current.remove(provider);
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
