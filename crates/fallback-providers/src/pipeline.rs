//! Ordered provider pipeline.
//!
//! Providers are ordered by tier (primary, secondary, local) and by
//! registration order within a tier. Each request asks the pipeline for its
//! candidates: providers whose availability probe passes right now. Probes
//! that need the network are cached for `probe_ttl` so a request burst does
//! not hammer a dead daemon.

use dashmap::DashMap;
use fallback_core::{ProbeKind, ProviderTier, TextGenerator};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a cached network probe result
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(60);

/// Availability of one pipeline entry
#[derive(Clone)]
pub struct ProviderAvailability {
    /// The provider
    pub provider: Arc<dyn TextGenerator>,
    /// Whether its probe passed
    pub available: bool,
}

impl std::fmt::Debug for ProviderAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAvailability")
            .field("provider", &self.provider.name())
            .field("tier", &self.provider.tier())
            .field("available", &self.available)
            .finish()
    }
}

/// Ordered, probe-filtered list of providers
pub struct ProviderPipeline {
    providers: Vec<Arc<dyn TextGenerator>>,
    probe_ttl: Duration,
    probes: DashMap<String, (Instant, bool)>,
}

impl ProviderPipeline {
    /// Build a pipeline; the sort is stable so registration order breaks ties
    #[must_use]
    pub fn new(mut providers: Vec<Arc<dyn TextGenerator>>, probe_ttl: Duration) -> Self {
        providers.sort_by_key(|p| p.tier());
        Self {
            providers,
            probe_ttl,
            probes: DashMap::new(),
        }
    }

    /// Build a pipeline with the default probe TTL
    #[must_use]
    pub fn with_defaults(providers: Vec<Arc<dyn TextGenerator>>) -> Self {
        Self::new(providers, DEFAULT_PROBE_TTL)
    }

    /// All providers in pipeline order, regardless of availability
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn TextGenerator>] {
        &self.providers
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Tiers in pipeline order
    #[must_use]
    pub fn tiers(&self) -> Vec<(String, ProviderTier)> {
        self.providers
            .iter()
            .map(|p| (p.name().to_string(), p.tier()))
            .collect()
    }

    /// Probe every provider concurrently, in pipeline order
    pub async fn availability(&self) -> Vec<ProviderAvailability> {
        let probes = self.providers.iter().map(|provider| async move {
            let available = self.probe(provider.as_ref()).await;
            ProviderAvailability {
                provider: Arc::clone(provider),
                available,
            }
        });
        join_all(probes).await
    }

    /// Providers whose probe passes, in pipeline order
    pub async fn candidates(&self) -> Vec<Arc<dyn TextGenerator>> {
        self.availability()
            .await
            .into_iter()
            .filter_map(|entry| {
                if entry.available {
                    Some(entry.provider)
                } else {
                    debug!(provider = %entry.provider.name(), "Provider unavailable, excluded from pipeline");
                    None
                }
            })
            .collect()
    }

    /// Forget cached probe results
    pub fn invalidate_probes(&self) {
        self.probes.clear();
    }

    async fn probe(&self, provider: &dyn TextGenerator) -> bool {
        if provider.probe_kind() == ProbeKind::Static {
            return provider.is_available().await;
        }

        let name = provider.name();
        if let Some(entry) = self.probes.get(name) {
            let (checked_at, available) = *entry.value();
            if checked_at.elapsed() < self.probe_ttl {
                return available;
            }
        }

        let available = provider.is_available().await;
        self.probes
            .insert(name.to_string(), (Instant::now(), available));
        debug!(provider = %name, available, "Provider probed");
        available
    }
}
