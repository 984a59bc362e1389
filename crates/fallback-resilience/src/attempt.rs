//! Per-attempt records fed to logs and metrics.

use fallback_core::{metric_names, ErrorKind, EventStatus, MetricsSink, ProviderEvent};
use std::time::Duration;

/// Outcome of a single provider attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Provider returned usable text
    Success,
    /// Provider failed
    Failure,
}

impl AttemptOutcome {
    /// Label for metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Ephemeral record of one attempt; never persisted
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Provider name
    pub provider: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Outcome
    pub outcome: AttemptOutcome,
    /// Observed latency
    pub latency: Duration,
    /// Error kind when failed
    pub error_kind: Option<ErrorKind>,
    /// Error description when failed
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Record for a successful attempt
    pub fn success(provider: impl Into<String>, attempt: u32, latency: Duration) -> Self {
        Self {
            provider: provider.into(),
            attempt,
            outcome: AttemptOutcome::Success,
            latency,
            error_kind: None,
            error: None,
        }
    }

    /// Record for a failed attempt
    pub fn failure(
        provider: impl Into<String>,
        attempt: u32,
        latency: Duration,
        error: &fallback_core::ProviderError,
    ) -> Self {
        Self {
            provider: provider.into(),
            attempt,
            outcome: AttemptOutcome::Failure,
            latency,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
        }
    }

    /// Log the attempt as a `provider_call` event and update metrics
    pub fn emit(&self, metrics: &dyn MetricsSink) {
        let status = match self.outcome {
            AttemptOutcome::Success => EventStatus::Ok,
            AttemptOutcome::Failure => EventStatus::Error,
        };
        let mut event = ProviderEvent::new("provider_call", &self.provider, status)
            .latency(self.latency);
        if let Some(ref error) = self.error {
            event = event.error(error);
        }
        event.emit();

        if let Some(kind) = self.error_kind {
            tracing::warn!(
                provider = %self.provider,
                error_kind = %kind,
                attempt = self.attempt,
                "Provider attempt failed"
            );
        }

        metrics.increment(
            metric_names::PROVIDER_ATTEMPTS_TOTAL,
            &[("provider", &self.provider), ("outcome", self.outcome.as_str())],
        );
        metrics.observe(
            metric_names::PROVIDER_LATENCY_SECONDS,
            &[("provider", &self.provider)],
            self.latency.as_secs_f64(),
        );
        if let Some(kind) = self.error_kind {
            metrics.increment(
                metric_names::PROVIDER_FAILURES_TOTAL,
                &[("provider", &self.provider), ("error_kind", kind.as_str())],
            );
        }
    }
}
