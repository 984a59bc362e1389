//! Metrics sinks.
//!
//! `PrometheusMetrics` registers counter and histogram families lazily, the
//! first time a name is used, and serves the text exposition format.
//! `RecordingMetrics` keeps everything in memory for assertions in tests.

use fallback_core::{metric_names as names, MetricsSink};
use parking_lot::{Mutex, RwLock};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use tracing::warn;

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Metrics error
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Prometheus rejected a family or failed to encode
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Encoded output was not UTF-8
    #[error("Metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

fn help_for(name: &str) -> &'static str {
    match name {
        names::REQUESTS_TOTAL => "Requests processed, by outcome",
        names::PROVIDER_FAILURES_TOTAL => "Failed provider attempts, by error kind",
        names::PROVIDER_ATTEMPTS_TOTAL => "Provider attempts, by outcome",
        names::PROVIDER_FALLBACKS_TOTAL => "Moves from a failed provider to the next candidate",
        names::CACHE_REQUESTS_TOTAL => "Response cache lookups, by result",
        names::COOLDOWN_SKIPS_TOTAL => "Providers skipped because their circuit was open",
        names::ADAPTIVE_TIMEOUTS_TOTAL => "Adaptive timeout increases",
        names::PROVIDER_LATENCY_SECONDS => "Provider attempt latency in seconds",
        _ => "LLM fallback gateway metric",
    }
}

/// A metric family plus the label names it was registered with
struct Family<M> {
    metric: M,
    label_names: Vec<String>,
}

impl<M> Family<M> {
    /// Label values in registration order; missing labels become empty strings
    fn values<'a>(&self, labels: &[(&str, &'a str)]) -> Vec<&'a str> {
        self.label_names
            .iter()
            .map(|name| {
                labels
                    .iter()
                    .find(|(k, _)| k == name)
                    .map_or("", |(_, v)| *v)
            })
            .collect()
    }
}

/// Prometheus-backed metrics sink
pub struct PrometheusMetrics {
    registry: Registry,
    namespace: String,
    counters: RwLock<HashMap<String, Family<IntCounterVec>>>,
    histograms: RwLock<HashMap<String, Family<HistogramVec>>>,
}

impl PrometheusMetrics {
    /// Create a sink with its own registry
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_registry(namespace, Registry::new())
    }

    /// Create a sink registering into `registry`
    #[must_use]
    pub fn with_registry(namespace: impl Into<String>, registry: Registry) -> Self {
        Self {
            registry,
            namespace: namespace.into(),
            counters: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn label_names(labels: &[(&str, &str)]) -> Vec<String> {
        labels.iter().map(|(k, _)| (*k).to_string()).collect()
    }

    fn register_counter(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        let mut counters = self.counters.write();
        if counters.contains_key(name) {
            return Ok(());
        }
        let label_names = Self::label_names(labels);
        let refs: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let metric = IntCounterVec::new(
            Opts::new(name, help_for(name)).namespace(self.namespace.clone()),
            &refs,
        )?;
        self.registry.register(Box::new(metric.clone()))?;
        counters.insert(name.to_string(), Family { metric, label_names });
        Ok(())
    }

    fn register_histogram(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        let mut histograms = self.histograms.write();
        if histograms.contains_key(name) {
            return Ok(());
        }
        let label_names = Self::label_names(labels);
        let refs: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let metric = HistogramVec::new(
            HistogramOpts::new(name, help_for(name))
                .namespace(self.namespace.clone())
                .buckets(LATENCY_BUCKETS.to_vec()),
            &refs,
        )?;
        self.registry.register(Box::new(metric.clone()))?;
        histograms.insert(name.to_string(), Family { metric, label_names });
        Ok(())
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        if !self.counters.read().contains_key(name) {
            if let Err(e) = self.register_counter(name, labels) {
                warn!(metric = %name, error = %e, "Failed to register counter");
                return;
            }
        }

        let counters = self.counters.read();
        if let Some(family) = counters.get(name) {
            match family.metric.get_metric_with_label_values(&family.values(labels)) {
                Ok(counter) => counter.inc(),
                Err(e) => warn!(metric = %name, error = %e, "Counter label mismatch"),
            }
        }
    }

    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        if !self.histograms.read().contains_key(name) {
            if let Err(e) = self.register_histogram(name, labels) {
                warn!(metric = %name, error = %e, "Failed to register histogram");
                return;
            }
        }

        let histograms = self.histograms.read();
        if let Some(family) = histograms.get(name) {
            match family.metric.get_metric_with_label_values(&family.values(labels)) {
                Ok(histogram) => histogram.observe(value),
                Err(e) => warn!(metric = %name, error = %e, "Histogram label mismatch"),
            }
        }
    }
}

type SeriesKey = (String, Vec<(String, String)>);

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

/// In-memory metrics sink for tests and diagnostics
#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<SeriesKey, u64>>,
    observations: Mutex<HashMap<String, Vec<f64>>>,
}

impl RecordingMetrics {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of one labelled counter series
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of a counter across all label values
    #[must_use]
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// All observed values for a histogram, in order
    #[must_use]
    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.observations
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        *self.counters.lock().entry(series_key(name, labels)).or_insert(0) += 1;
    }

    fn observe(&self, name: &str, _labels: &[(&str, &str)], value: f64) {
        self.observations
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
