//! Response caching with prompt-size dependent TTL.
//!
//! Provides a cache backend abstraction plus the response cache used by the
//! orchestrator:
//! - `CacheBackend`: byte-oriented `get`/`set` with TTL (in-memory by default)
//! - `ResponseCache`: key derivation, TTL policy, hit/miss accounting
//!
//! Short prompts are cached longer than long prompts; long, context-heavy
//! prompts are assumed to go stale faster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fallback_core::{metric_names, GenerationContext, MetricsSink, NoopMetrics};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend not available
    #[error("Cache backend not available: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache store collaborator
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value; expired entries are never returned
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value with TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete a key
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete all keys starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Local cache entry with instant-based expiry
#[derive(Debug)]
struct LocalCacheEntry {
    data: Vec<u8>,
    /// `None` when the TTL is too large to represent
    expires_at: Option<Instant>,
    hits: u64,
}

impl LocalCacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now().checked_add(ttl),
            hits: 0,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory cache backend
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, LocalCacheEntry>>,
    max_entries: usize,
}

impl MemoryCacheBackend {
    /// Create a new memory cache backend
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, including not-yet-evicted expired ones
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the backend holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Evict expired entries, then the least-hit ones, to make room for one insert
    fn evict_if_needed(&self, entries: &mut HashMap<String, LocalCacheEntry>) {
        entries.retain(|_, entry| !entry.is_expired());

        if entries.len() >= self.max_entries {
            let to_remove = entries.len() - self.max_entries + 1;
            let mut hit_counts: Vec<(String, u64)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.hits))
                .collect();
            hit_counts.sort_by_key(|(_, hits)| *hits);

            for (key, _) in hit_counts.into_iter().take(to_remove) {
                entries.remove(&key);
            }
        }
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired() {
                entries.remove(key);
                return Ok(None);
            }
            entry.hits += 1;
            return Ok(Some(entry.data.clone()));
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            self.evict_if_needed(&mut entries);
        }
        entries.insert(key.to_string(), LocalCacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Cached answer with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAnswer {
    /// Generated text
    pub text: String,
    /// Provider that produced the text
    pub provider: String,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
    /// When the entry stops being valid
    pub expires_at: DateTime<Utc>,
}

impl CachedAnswer {
    /// Create a new cached answer valid for `ttl`
    pub fn new(text: impl Into<String>, provider: impl Into<String>, ttl: Duration) -> Self {
        let cached_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let expires_at = cached_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            text: text.into(),
            provider: provider.into(),
            cached_at,
            expires_at,
        }
    }

    /// Check if the entry is expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// TTL policy: short prompts live longer than long prompts
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    /// Prompts up to this many characters count as short
    pub short_prompt_max_chars: usize,
    /// TTL for short prompts
    pub short_prompt_ttl: Duration,
    /// TTL for long prompts and local-fallback answers
    pub long_prompt_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            short_prompt_max_chars: 500,
            short_prompt_ttl: Duration::from_secs(3600),
            long_prompt_ttl: Duration::from_secs(600),
        }
    }
}

impl TtlPolicy {
    /// TTL for an answer to `message`
    #[must_use]
    pub fn ttl_for(&self, message: &str) -> Duration {
        if message.chars().count() <= self.short_prompt_max_chars {
            self.short_prompt_ttl
        } else {
            self.long_prompt_ttl
        }
    }

    /// TTL for a local-fallback answer
    #[must_use]
    pub fn fallback_ttl(&self) -> Duration {
        self.long_prompt_ttl.min(self.short_prompt_ttl)
    }
}

/// Response cache configuration
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Key prefix (namespace isolation)
    pub key_prefix: String,
    /// TTL policy
    pub ttl: TtlPolicy,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "llm-fallback".to_string(),
            ttl: TtlPolicy::default(),
        }
    }
}

/// Hit/miss statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Backend errors (treated as misses)
    pub backend_errors: u64,
}

impl CacheStats {
    /// Hit rate in percent
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Cache for generated answers, one namespace per logical prompt
pub struct ResponseCache {
    config: ResponseCacheConfig,
    backend: Arc<dyn CacheBackend>,
    metrics: Arc<dyn MetricsSink>,
    hits: AtomicU64,
    misses: AtomicU64,
    backend_errors: AtomicU64,
}

impl ResponseCache {
    /// Create a cache over `backend`
    #[must_use]
    pub fn new(config: ResponseCacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            metrics: Arc::new(NoopMetrics),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
        }
    }

    /// Create with defaults (in-memory backend)
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            ResponseCacheConfig::default(),
            Arc::new(MemoryCacheBackend::default()),
        )
    }

    /// Report hits and misses to `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Check if caching is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Derive the cache key for a message and its context.
    ///
    /// The message is trimmed, lowercased and has internal whitespace
    /// collapsed; the context contributes its canonical JSON form.
    #[must_use]
    pub fn key_for(&self, message: &str, context: &GenerationContext) -> String {
        let normalized = normalize_prompt(message);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        if !context.is_empty() {
            hasher.update(b"\x1f");
            hasher.update(context.canonical_json().as_bytes());
        }
        format!("{}:response:{}", self.config.key_prefix, hex::encode(hasher.finalize()))
    }

    /// TTL applied to an answer for `message`
    #[must_use]
    pub fn ttl_for(&self, message: &str) -> Duration {
        self.config.ttl.ttl_for(message)
    }

    /// TTL applied to local-fallback answers
    #[must_use]
    pub fn fallback_ttl(&self) -> Duration {
        self.config.ttl.fallback_ttl()
    }

    /// Look up a cached answer
    pub async fn get(&self, key: &str) -> Option<CachedAnswer> {
        if !self.config.enabled {
            return None;
        }

        let found = self.lookup(key).await;
        let (result, event) = if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            ("hit", "cache_hit")
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            ("miss", "cache_miss")
        };
        debug!(event, key = %key, "Cache lookup");
        self.metrics
            .increment(metric_names::CACHE_REQUESTS_TOTAL, &[("result", result)]);

        found
    }

    /// Look up a cached answer without touching hit/miss accounting
    pub async fn peek(&self, key: &str) -> Option<CachedAnswer> {
        if !self.config.enabled {
            return None;
        }
        self.lookup(key).await
    }

    async fn lookup(&self, key: &str) -> Option<CachedAnswer> {
        match self.backend.get(key).await {
            Ok(Some(data)) => match serde_json::from_slice::<CachedAnswer>(&data) {
                Ok(entry) if !entry.is_expired() => Some(entry),
                Ok(_) => {
                    let _ = self.backend.delete(key).await;
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.backend_errors.fetch_add(1, Ordering::Relaxed);
                warn!(backend = self.backend.name(), error = %e, "Cache get error");
                None
            }
        }
    }

    /// Store an answer with an explicit TTL
    pub async fn set(&self, key: &str, text: &str, provider: &str, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        let entry = CachedAnswer::new(text, provider, ttl);
        let data = match serde_json::to_vec(&entry) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.backend.set(key, data, ttl).await {
            self.backend_errors.fetch_add(1, Ordering::Relaxed);
            warn!(backend = self.backend.name(), error = %e, "Cache set error");
            return;
        }

        debug!(key = %key, provider = %provider, ttl_secs = ttl.as_secs(), "Response cached");
    }

    /// Drop the cached answer for a message and context
    pub async fn invalidate(&self, message: &str, context: &GenerationContext) {
        let key = self.key_for(message, context);
        if let Err(e) = self.backend.delete(&key).await {
            warn!(error = %e, "Failed to invalidate cache entry");
        }
    }

    /// Clear all answers in this cache's namespace
    pub async fn clear(&self) {
        let prefix = format!("{}:response:", self.config.key_prefix);
        match self.backend.delete_prefix(&prefix).await {
            Ok(removed) => info!(removed, "Response cache cleared"),
            Err(e) => warn!(error = %e, "Failed to clear response cache"),
        }
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}

/// Normalize a prompt for cache keying
#[must_use]
pub fn normalize_prompt(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
