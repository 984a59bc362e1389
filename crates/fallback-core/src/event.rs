//! Structured provider events.
//!
//! Every provider transition is logged with the same field set
//! `{event, provider, route, status, latency_ms, error}` so log pipelines
//! can index them uniformly.

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Operation succeeded
    Ok,
    /// Operation failed
    Error,
    /// Operation was skipped
    Skipped,
}

impl EventStatus {
    /// Label for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured provider event
#[derive(Debug, Clone)]
pub struct ProviderEvent<'a> {
    /// Event name (`provider_call`, `provider_fallback`, `cooldown_skip`, ...)
    pub event: &'static str,
    /// Provider the event concerns
    pub provider: &'a str,
    /// Route taken, e.g. `openai->ollama` or `process`
    pub route: &'a str,
    /// Outcome
    pub status: EventStatus,
    /// Latency, when measured
    pub latency: Option<Duration>,
    /// Error description, when failed
    pub error: Option<String>,
}

impl<'a> ProviderEvent<'a> {
    /// Start a new event
    #[must_use]
    pub fn new(event: &'static str, provider: &'a str, status: EventStatus) -> Self {
        Self {
            event,
            provider,
            route: "process",
            status,
            latency: None,
            error: None,
        }
    }

    /// Set the route
    #[must_use]
    pub fn route(mut self, route: &'a str) -> Self {
        self.route = route;
        self
    }

    /// Set the measured latency
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Attach an error
    #[must_use]
    pub fn error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Emit the event through `tracing`
    pub fn emit(&self) {
        let latency_ms = self.latency.map_or(0, |l| l.as_millis() as u64);
        let error = self.error.as_deref().unwrap_or("");

        match self.status {
            EventStatus::Ok => info!(
                event = self.event,
                provider = %self.provider,
                route = %self.route,
                status = %self.status,
                latency_ms,
                error,
                "provider event"
            ),
            EventStatus::Error => warn!(
                event = self.event,
                provider = %self.provider,
                route = %self.route,
                status = %self.status,
                latency_ms,
                error,
                "provider event"
            ),
            EventStatus::Skipped => debug!(
                event = self.event,
                provider = %self.provider,
                route = %self.route,
                status = %self.status,
                latency_ms,
                error,
                "provider event"
            ),
        }
    }
}
