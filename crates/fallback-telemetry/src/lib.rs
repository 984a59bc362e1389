//! # Fallback Telemetry
//!
//! Observability for the LLM fallback gateway:
//! - Structured logging via `tracing-subscriber` (pretty or JSON)
//! - Prometheus metrics sink with text exposition
//! - In-memory recording sink for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod tracing_setup;

pub use metrics::{MetricsError, PrometheusMetrics, RecordingMetrics};
pub use tracing_setup::{init_tracing, TracingConfig, TracingError};
