//! Fallback orchestrator.
//!
//! Each request walks a small state machine:
//!
//! ```text
//! CACHE_LOOKUP -> hit: DONE
//!              -> miss: ATTEMPTING(0)
//! ATTEMPTING(i) -> success: DONE
//!               -> breaker open: ATTEMPTING(i + 1)
//!               -> exhausted: ATTEMPTING(i + 1)
//!               -> no candidates left: LOCAL_FALLBACK -> DONE
//! ```
//!
//! Cache misses for the same key are collapsed into one computation, and
//! whatever that computation resolves to (including a local answer) is
//! written back to the cache.

use fallback_config::AppConfig;
use fallback_core::{
    metric_names, Answer, EventStatus, GenerationContext, MetricsSink, NoopMetrics, ProviderEvent,
    ProviderTier, TextGenerator, LOCAL_PROVIDER,
};
use fallback_providers::{build_providers, LocalGenerator, ProviderPipeline, DEFAULT_PROBE_TTL};
use fallback_resilience::{
    CacheBackend, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, InFlightMap,
    MemoryCacheBackend, ResponseCache, ResponseCacheConfig, RetryConfig, RetryExecutor, RetryPolicy,
    TimeoutConfig, TimeoutManager, TtlPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::prompt::PromptTemplate;

/// Default upper bound on one shared in-flight computation
const DEFAULT_DEDUP_CEILING: Duration = Duration::from_secs(180);

/// Why a request ended up with the local answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackReason {
    EmptyMessage,
    NoCandidates,
    AllSkipped,
    AllProvidersExhausted,
    DedupFailed,
}

impl FallbackReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::NoCandidates => "no_candidates",
            Self::AllSkipped => "all_skipped",
            Self::AllProvidersExhausted => "all_providers_exhausted",
            Self::DedupFailed => "dedup_failed",
        }
    }
}

enum Step {
    Attempting { index: usize, failed: Option<String> },
    LocalFallback { reason: FallbackReason, failed: Option<String> },
    Done { text: String, provider: String },
}

/// Availability and breaker state of one pipeline entry
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    /// Provider name
    pub name: String,
    /// Pipeline tier
    pub tier: ProviderTier,
    /// Whether the availability probe passed
    pub available: bool,
    /// Circuit breaker snapshot
    pub circuit: CircuitBreakerStats,
}

pub(crate) struct Inner {
    pub(crate) pipeline: ProviderPipeline,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) executor: RetryExecutor,
    pub(crate) cache: ResponseCache,
    pub(crate) in_flight: InFlightMap<Answer>,
    pub(crate) local: LocalGenerator,
    pub(crate) prompt: PromptTemplate,
    pub(crate) metrics: Arc<dyn MetricsSink>,
}

/// Answers messages through cache, dedup, providers and the local fallback.
///
/// Cheap to clone; clones share breaker, cache and in-flight state.
#[derive(Clone)]
pub struct FallbackOrchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl FallbackOrchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Compose providers, pipeline, breakers, timeouts, cache and dedup
    /// from configuration. Providers that fail to configure are logged and
    /// left out.
    #[must_use]
    pub fn from_config(config: &AppConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let mut builder = Self::builder()
            .providers(build_providers(config))
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                cooldown: config.circuit_breaker.cooldown,
                cooldown_multiplier: config.circuit_breaker.cooldown_multiplier,
                max_cooldown: config.circuit_breaker.max_cooldown,
            })
            .retry(RetryConfig {
                max_retries: config.retry.max_retries,
                base_delay: config.retry.base_delay,
                max_delay: config.retry.max_delay,
                jitter: config.retry.jitter,
            })
            .timeouts(TimeoutConfig {
                initial: config.timeout.initial,
                max: config.timeout.max,
                growth_factor: config.timeout.growth_factor,
            })
            .cache_config(ResponseCacheConfig {
                enabled: config.cache.enabled,
                key_prefix: config.cache.key_prefix.clone(),
                ttl: TtlPolicy {
                    short_prompt_max_chars: config.cache.short_prompt_max_chars,
                    short_prompt_ttl: config.cache.short_prompt_ttl,
                    long_prompt_ttl: config.cache.long_prompt_ttl,
                },
            })
            .cache_backend(Arc::new(MemoryCacheBackend::new(config.cache.max_entries)))
            .dedup_ceiling(config.dedup.in_flight_ceiling)
            .probe_ttl(config.pipeline.probe_ttl)
            .prompt(PromptTemplate::new(config.prompt.system_preamble.clone()))
            .metrics(metrics);

        for provider in config.enabled_providers() {
            if let Some(timeout) = provider.timeout {
                builder = builder.provider_timeout(&provider.name, timeout);
            }
        }

        builder.build()
    }

    /// Answer `message`.
    ///
    /// Always returns non-empty text. Empty or whitespace-only messages are
    /// answered locally without touching the cache or any provider.
    pub async fn process(&self, message: &str, context: Option<GenerationContext>) -> Answer {
        let answer = self.answer(message, context.unwrap_or_default()).await;
        self.inner.record_outcome(&answer);
        answer
    }

    async fn answer(&self, message: &str, context: GenerationContext) -> Answer {
        if message.trim().is_empty() {
            return self.inner.local_answer(message, &context, FallbackReason::EmptyMessage);
        }

        let key = self.inner.cache.key_for(message, &context);
        if let Some(hit) = self.inner.cache.get(&key).await {
            return Answer::cached(hit.text, hit.provider);
        }

        let inner = Arc::clone(&self.inner);
        let producer_key = key.clone();
        let producer_message = message.to_string();
        let producer_context = context.clone();
        let joined = self
            .inner
            .in_flight
            .run(&key, move || async move {
                inner
                    .produce(&producer_key, &producer_message, &producer_context)
                    .await
            })
            .await;

        match joined {
            Ok(joined) => joined.value,
            Err(e) => {
                warn!(key = %key, error = %e, "Shared computation failed, answering locally");
                self.inner.local_answer(message, &context, FallbackReason::DedupFailed)
            }
        }
    }

    /// Availability and breaker state for every registered provider
    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        self.inner
            .pipeline
            .availability()
            .await
            .into_iter()
            .map(|entry| {
                let name = entry.provider.name().to_string();
                ProviderHealth {
                    circuit: self.inner.breakers.breaker(&name).stats(),
                    tier: entry.provider.tier(),
                    available: entry.available,
                    name,
                }
            })
            .collect()
    }

    /// The response cache
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// The circuit breaker registry
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.inner.breakers
    }

    /// The provider pipeline
    #[must_use]
    pub fn pipeline(&self) -> &ProviderPipeline {
        &self.inner.pipeline
    }

    /// Number of shared computations currently running
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.in_flight_count()
    }
}

impl Inner {
    /// Runs once per key on behalf of every concurrent caller
    async fn produce(&self, key: &str, message: &str, context: &GenerationContext) -> Answer {
        // A previous producer for this key may have finished between our
        // cache miss and claiming the slot.
        if let Some(hit) = self.cache.peek(key).await {
            return Answer::cached(hit.text, hit.provider);
        }

        let (text, provider) = self.resolve(message, context).await;
        let ttl = if provider == LOCAL_PROVIDER {
            self.cache.fallback_ttl()
        } else {
            self.cache.ttl_for(message)
        };
        self.cache.set(key, &text, &provider, ttl).await;
        Answer::generated(text, provider)
    }

    async fn resolve(&self, message: &str, context: &GenerationContext) -> (String, String) {
        let prompt = self.prompt.render(message, context);
        let candidates = self.pipeline.candidates().await;
        let mut attempted = 0_usize;
        let mut step = Step::Attempting {
            index: 0,
            failed: None,
        };

        loop {
            step = match step {
                Step::Attempting { index, failed } => match candidates.get(index) {
                    None => {
                        let reason = if candidates.is_empty() {
                            FallbackReason::NoCandidates
                        } else if attempted == 0 {
                            FallbackReason::AllSkipped
                        } else {
                            FallbackReason::AllProvidersExhausted
                        };
                        Step::LocalFallback { reason, failed }
                    }
                    Some(provider) => {
                        let name = provider.name();
                        if self.breakers.allow(name) {
                            if let Some(from) = failed.as_deref() {
                                self.record_fallback(from, name);
                            }
                            attempted += 1;
                            match self.executor.execute(provider.as_ref(), &prompt, context).await {
                                Ok(text) => Step::Done {
                                    text,
                                    provider: name.to_string(),
                                },
                                Err(error) => {
                                    warn!(
                                        provider = %name,
                                        error_kind = %error.kind(),
                                        error = %error,
                                        "Provider exhausted"
                                    );
                                    Step::Attempting {
                                        index: index + 1,
                                        failed: Some(name.to_string()),
                                    }
                                }
                            }
                        } else {
                            self.cooldown_skip(name);
                            Step::Attempting {
                                index: index + 1,
                                failed,
                            }
                        }
                    }
                },
                Step::LocalFallback { reason, failed } => {
                    if let Some(from) = failed.as_deref() {
                        self.record_fallback(from, LOCAL_PROVIDER);
                    }
                    info!(
                        event = "local_fallback",
                        reason = reason.as_str(),
                        candidates = candidates.len(),
                        attempted,
                        "Answering with local generator"
                    );
                    Step::Done {
                        text: self.local.answer(message, context),
                        provider: LOCAL_PROVIDER.to_string(),
                    }
                }
                Step::Done { text, provider } => return (text, provider),
            };
        }
    }

    /// Local answer that is not cached
    fn local_answer(
        &self,
        message: &str,
        context: &GenerationContext,
        reason: FallbackReason,
    ) -> Answer {
        info!(event = "local_fallback", reason = reason.as_str(), "Answering with local generator");
        Answer::generated(self.local.answer(message, context), LOCAL_PROVIDER)
    }

    pub(crate) fn cooldown_skip(&self, provider: &str) {
        ProviderEvent::new("cooldown_skip", provider, EventStatus::Skipped).emit();
        self.metrics
            .increment(metric_names::COOLDOWN_SKIPS_TOTAL, &[("provider", provider)]);
    }

    pub(crate) fn record_fallback(&self, from: &str, to: &str) {
        let route = format!("{from}->{to}");
        ProviderEvent::new("provider_fallback", to, EventStatus::Ok)
            .route(&route)
            .emit();
        self.metrics.increment(
            metric_names::PROVIDER_FALLBACKS_TOTAL,
            &[("from", from), ("to", to)],
        );
    }

    pub(crate) fn record_outcome(&self, answer: &Answer) {
        let outcome = if answer.used_cache {
            "cache_hit"
        } else if answer.is_local() {
            "local_fallback"
        } else {
            "success"
        };
        self.metrics
            .increment(metric_names::REQUESTS_TOTAL, &[("outcome", outcome)]);
    }
}

/// Builder for [`FallbackOrchestrator`]
pub struct OrchestratorBuilder {
    providers: Vec<Arc<dyn TextGenerator>>,
    circuit_breaker: CircuitBreakerConfig,
    retry: RetryConfig,
    timeouts: TimeoutConfig,
    provider_timeouts: Vec<(String, Duration)>,
    cache: ResponseCacheConfig,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    dedup_ceiling: Duration,
    probe_ttl: Duration,
    prompt: PromptTemplate,
    metrics: Arc<dyn MetricsSink>,
}

impl OrchestratorBuilder {
    /// Create a builder with default settings and no providers
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            provider_timeouts: Vec::new(),
            cache: ResponseCacheConfig::default(),
            cache_backend: None,
            dedup_ceiling: DEFAULT_DEDUP_CEILING,
            probe_ttl: DEFAULT_PROBE_TTL,
            prompt: PromptTemplate::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Register a provider
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn TextGenerator>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Register several providers
    #[must_use]
    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn TextGenerator>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Set circuit breaker configuration
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set retry configuration
    #[must_use]
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set adaptive timeout configuration
    #[must_use]
    pub fn timeouts(mut self, config: TimeoutConfig) -> Self {
        self.timeouts = config;
        self
    }

    /// Seed the starting timeout for one provider
    #[must_use]
    pub fn provider_timeout(mut self, provider: impl Into<String>, timeout: Duration) -> Self {
        self.provider_timeouts.push((provider.into(), timeout));
        self
    }

    /// Set response cache configuration
    #[must_use]
    pub fn cache_config(mut self, config: ResponseCacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Use a specific cache backend
    #[must_use]
    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Bound a shared in-flight computation
    #[must_use]
    pub fn dedup_ceiling(mut self, ceiling: Duration) -> Self {
        self.dedup_ceiling = ceiling;
        self
    }

    /// Lifetime of cached network probe results
    #[must_use]
    pub fn probe_ttl(mut self, ttl: Duration) -> Self {
        self.probe_ttl = ttl;
        self
    }

    /// Set the prompt template
    #[must_use]
    pub fn prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    /// Report metrics to `metrics`
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the orchestrator
    #[must_use]
    pub fn build(self) -> FallbackOrchestrator {
        let metrics = self.metrics;

        let breakers = Arc::new(CircuitBreakerRegistry::new(self.circuit_breaker));
        let timeouts = TimeoutManager::new(self.timeouts).with_metrics(Arc::clone(&metrics));
        for (provider, timeout) in &self.provider_timeouts {
            timeouts.set_initial(provider, *timeout);
        }
        let executor = RetryExecutor::new(
            RetryPolicy::new(self.retry),
            Arc::clone(&breakers),
            Arc::new(timeouts),
        )
        .with_metrics(Arc::clone(&metrics));

        let backend = self
            .cache_backend
            .unwrap_or_else(|| Arc::new(MemoryCacheBackend::default()));
        let cache = ResponseCache::new(self.cache, backend).with_metrics(Arc::clone(&metrics));

        let pipeline = ProviderPipeline::new(self.providers, self.probe_ttl);
        info!(
            providers = ?pipeline.tiers(),
            dedup_ceiling_secs = self.dedup_ceiling.as_secs(),
            "Fallback orchestrator ready"
        );

        FallbackOrchestrator {
            inner: Arc::new(Inner {
                pipeline,
                breakers,
                executor,
                cache,
                in_flight: InFlightMap::new(self.dedup_ceiling),
                local: LocalGenerator::new(),
                prompt: self.prompt,
                metrics,
            }),
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
