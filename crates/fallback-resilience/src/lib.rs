//! # Fallback Resilience
//!
//! Resilience patterns for the LLM fallback gateway:
//! - Per-provider circuit breakers
//! - Retry executor with exponential backoff
//! - Adaptive per-provider timeouts
//! - Response cache with prompt-size dependent TTL
//! - In-flight request deduplication

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod cache;
pub mod circuit_breaker;
pub mod dedup;
pub mod retry;
pub mod timeout;

// Re-export main types
pub use attempt::{AttemptOutcome, AttemptRecord};
pub use cache::{
    normalize_prompt, CacheBackend, CacheError, CacheResult, CacheStats, CachedAnswer,
    MemoryCacheBackend, ResponseCache, ResponseCacheConfig, TtlPolicy,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use dedup::{DedupError, InFlightMap, Joined, Role};
pub use retry::{RetryConfig, RetryExecutor, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{TimeoutConfig, TimeoutManager};
