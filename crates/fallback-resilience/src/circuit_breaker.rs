//! Circuit breaker pattern implementation.
//!
//! The circuit breaker stops calls to a provider that keeps failing and
//! gives it time to recover. One breaker exists per provider; the
//! [`CircuitBreakerRegistry`] owns them for the whole process.
//!
//! Transitions:
//! - `Closed -> Open` once consecutive failures reach the threshold
//! - `Open -> HalfOpen` once the cooldown has elapsed
//! - `HalfOpen -> Closed` when the single trial call succeeds
//! - `HalfOpen -> Open` when the trial fails; the cooldown grows by
//!   `cooldown_multiplier` up to `max_cooldown`

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, a single trial request is admitted
    HalfOpen = 2,
}

impl CircuitState {
    /// Label for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Base time to wait before admitting a trial call
    pub cooldown: Duration,
    /// Cooldown growth factor applied when a trial fails (1.0 = reset policy)
    pub cooldown_multiplier: f64,
    /// Upper bound for the grown cooldown
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            cooldown_multiplier: 2.0,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_started_at: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
}

/// Circuit breaker for a single provider
pub struct CircuitBreaker {
    /// Provider identifier
    provider_id: String,
    /// Configuration
    config: CircuitBreakerConfig,
    /// All state lives behind one lock so transitions are serialized
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let cooldown = config.cooldown;
        Self {
            provider_id: provider_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown,
                trial_started_at: None,
                total_failures: 0,
                total_successes: 0,
            }),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(provider_id: impl Into<String>) -> Self {
        Self::new(provider_id, CircuitBreakerConfig::default())
    }

    /// Get the provider ID
    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Get the current state, applying the `Open -> HalfOpen` transition
    /// if the cooldown has elapsed
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Check whether a call may proceed.
    ///
    /// Returns `false` while open. In half-open state only the first caller
    /// is admitted; the trial permit lapses after one cooldown period if its
    /// outcome is never recorded.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let trial_active = inner
                    .trial_started_at
                    .is_some_and(|started| started.elapsed() < inner.cooldown);
                if trial_active {
                    false
                } else {
                    inner.trial_started_at = Some(Instant::now());
                    debug!(provider = %self.provider_id, "Circuit breaker admitting trial call");
                    true
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.transition_to_closed(&mut inner);
            }
            CircuitState::Open => {
                // Late result from a call admitted before the circuit opened
                debug!(provider = %self.provider_id, "Ignoring success while circuit open");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    debug!(
                        provider = %self.provider_id,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker failure threshold reached"
                    );
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                let grown = inner.cooldown.mul_f64(self.config.cooldown_multiplier.max(1.0));
                inner.cooldown = grown.min(self.config.max_cooldown.max(self.config.cooldown));
                debug!(
                    provider = %self.provider_id,
                    cooldown_ms = inner.cooldown.as_millis() as u64,
                    "Circuit breaker trial failed, reopening"
                );
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
        if elapsed >= inner.cooldown {
            inner.state = CircuitState::HalfOpen;
            inner.trial_started_at = None;
            info!(
                event = "circuit_half_open",
                provider = %self.provider_id,
                "Circuit breaker half-open, testing"
            );
        }
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_started_at = None;

        warn!(
            event = "circuit_opened",
            provider = %self.provider_id,
            failures = inner.consecutive_failures,
            cooldown_ms = inner.cooldown.as_millis() as u64,
            "Circuit breaker opened"
        );
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_started_at = None;
        inner.cooldown = self.config.cooldown;

        info!(
            event = "circuit_closed",
            provider = %self.provider_id,
            "Circuit breaker closed"
        );
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Force the circuit open (for manual intervention)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition_to_open(&mut inner);
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            cooldown: inner.cooldown,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Lifetime failure count
    pub total_failures: u64,
    /// Lifetime success count
    pub total_successes: u64,
    /// Cooldown applied the next time the circuit is open
    pub cooldown: Duration,
}

impl CircuitBreakerStats {
    /// Calculate lifetime failure rate
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_failures + self.total_successes;
        if total == 0 {
            0.0
        } else {
            self.total_failures as f64 / total as f64
        }
    }
}

/// Process-wide set of breakers, one per provider name
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry; breakers are created on first use
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Get (or create) the breaker for a provider
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(provider) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config.clone())))
                .value(),
        )
    }

    /// Whether a call to `provider` may proceed
    pub fn allow(&self, provider: &str) -> bool {
        self.breaker(provider).allow()
    }

    /// Record a successful call to `provider`
    pub fn record_success(&self, provider: &str) {
        self.breaker(provider).record_success();
    }

    /// Record a failed call to `provider`
    pub fn record_failure(&self, provider: &str) {
        self.breaker(provider).record_failure();
    }

    /// Current state of `provider`'s breaker
    pub fn state(&self, provider: &str) -> CircuitState {
        self.breaker(provider).state()
    }

    /// Statistics for every known provider, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerStats)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
