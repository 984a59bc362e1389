//! Metrics sink collaborator.
//!
//! Components report counters and histogram observations through this
//! trait; the concrete backend (Prometheus, in-memory recorder) is chosen at
//! the composition root.

/// Destination for counters and histogram observations.
///
/// Implementations must be safe under concurrent use; counters only ever
/// increase.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one
    fn increment(&self, name: &str, labels: &[(&str, &str)]);

    /// Record a histogram observation
    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn observe(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Metric names shared across crates
pub mod names {
    /// Requests by final outcome (`outcome` = success | cache_hit | local_fallback)
    pub const REQUESTS_TOTAL: &str = "requests_total";
    /// Provider failures (`provider`, `error_kind`)
    pub const PROVIDER_FAILURES_TOTAL: &str = "provider_failures_total";
    /// Provider attempts (`provider`, `outcome`)
    pub const PROVIDER_ATTEMPTS_TOTAL: &str = "provider_attempts_total";
    /// Fallback transitions (`from`, `to`)
    pub const PROVIDER_FALLBACKS_TOTAL: &str = "provider_fallbacks_total";
    /// Cache lookups (`result` = hit | miss)
    pub const CACHE_REQUESTS_TOTAL: &str = "cache_requests_total";
    /// Providers skipped because their breaker was open (`provider`)
    pub const COOLDOWN_SKIPS_TOTAL: &str = "cooldown_skips_total";
    /// Adaptive timeout increases (`provider`)
    pub const ADAPTIVE_TIMEOUTS_TOTAL: &str = "adaptive_timeouts_total";
    /// Attempt latency in seconds (`provider`)
    pub const PROVIDER_LATENCY_SECONDS: &str = "provider_latency_seconds";
}
