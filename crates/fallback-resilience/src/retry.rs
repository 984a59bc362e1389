//! Retry executor with exponential backoff.
//!
//! Runs one provider call with bounded retries. Each attempt is bounded by
//! the provider's adaptive timeout, reported to the circuit breaker, and
//! emitted as an [`AttemptRecord`]. Between attempts the executor sleeps
//! `min(base_delay * 2^(attempt-1), max_delay)`.

use crate::attempt::AttemptRecord;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::timeout::TimeoutManager;
use fallback_core::{
    ChunkStream, GenerationContext, MetricsSink, NoopMetrics, ProviderError, ProviderResult,
    TextGenerator,
};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per provider per request
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: 0.0,
        }
    }
}

/// Backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Create a policy with custom max retries
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(RetryConfig {
            max_retries,
            ..Default::default()
        })
    }

    /// Attempt budget, never less than one
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.max(1)
    }

    /// Delay to sleep after failed attempt `attempt` (1-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self.config.base_delay.as_millis() as f64;
        let delay = base * 2_f64.powi(exponent as i32);
        let delay = delay.min(self.config.max_delay.as_millis() as f64);

        if self.config.jitter <= 0.0 {
            return Duration::from_millis(delay as u64);
        }

        let jitter_range = delay * self.config.jitter.min(1.0);
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let final_delay = (delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Builder for retry policy
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max retries
    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    /// Set base delay
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set max delay
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set jitter factor
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Build the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy::new(self.config)
    }
}

/// Executes provider calls with retries, adaptive timeouts and breaker
/// reporting
pub struct RetryExecutor {
    policy: RetryPolicy,
    breakers: Arc<CircuitBreakerRegistry>,
    timeouts: Arc<TimeoutManager>,
    metrics: Arc<dyn MetricsSink>,
}

impl RetryExecutor {
    /// Create a new executor
    #[must_use]
    pub fn new(
        policy: RetryPolicy,
        breakers: Arc<CircuitBreakerRegistry>,
        timeouts: Arc<TimeoutManager>,
    ) -> Self {
        Self {
            policy,
            breakers,
            timeouts,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report attempts to `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get the retry policy
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Generate a complete answer from `provider`.
    ///
    /// The caller must already hold breaker permission for the first
    /// attempt. Whitespace-only responses count as invalid. Returns the
    /// last attempt's error once the budget is spent or the breaker stops
    /// admitting calls.
    pub async fn execute(
        &self,
        provider: &dyn TextGenerator,
        prompt: &str,
        context: &GenerationContext,
    ) -> ProviderResult<String> {
        let name = provider.name();
        self.attempt_loop(name, true, || async move {
            let text = provider.invoke(prompt, context).await?;
            if text.trim().is_empty() {
                return Err(ProviderError::invalid_response(name, "empty response"));
            }
            Ok(text)
        })
        .await
    }

    /// Open a chunk stream from `provider`, retrying the open.
    ///
    /// Success is not reported to the breaker here; the consumer records
    /// the outcome once the stream has been drained.
    pub async fn open_stream(
        &self,
        provider: &dyn TextGenerator,
        prompt: &str,
        context: &GenerationContext,
    ) -> ProviderResult<ChunkStream> {
        self.attempt_loop(provider.name(), false, || provider.stream(prompt, context))
            .await
    }

    async fn attempt_loop<T, F, Fut>(
        &self,
        name: &str,
        report_success: bool,
        operation: F,
    ) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut last_error: Option<ProviderError> = None;

        for attempt in 1..=max_attempts {
            let timeout = self.timeouts.current(name);
            let started = Instant::now();

            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(name, timeout)),
            };

            let latency = started.elapsed();
            self.timeouts.observe(name, latency);

            let error = match outcome {
                Ok(value) => {
                    if report_success {
                        self.breakers.record_success(name);
                    }
                    AttemptRecord::success(name, attempt, latency).emit(self.metrics.as_ref());
                    if attempt > 1 {
                        debug!(provider = %name, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            self.breakers.record_failure(name);
            AttemptRecord::failure(name, attempt, latency, &error).emit(self.metrics.as_ref());

            if !error.is_retryable() {
                return Err(error);
            }

            if attempt < max_attempts {
                if !self.breakers.allow(name) {
                    debug!(provider = %name, attempt, "Breaker no longer admits calls, stopping retries");
                    last_error = Some(error);
                    break;
                }

                let delay = self.policy.delay_for_attempt(attempt);
                warn!(
                    provider = %name,
                    attempt,
                    max_retries = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| ProviderError::transport(name, "retry budget exhausted")))
    }
}
