//! # Fallback Core
//!
//! Core types, traits, and error handling for the LLM fallback gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - The `TextGenerator` capability implemented by every provider
//! - The provider error taxonomy
//! - Generation context and answer types
//! - The metrics sink collaborator and structured provider events

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod event;
pub mod generator;
pub mod metrics;
pub mod types;

// Re-export commonly used types
pub use context::GenerationContext;
pub use error::{ErrorKind, ProviderError, ProviderResult};
pub use event::{EventStatus, ProviderEvent};
pub use generator::{chunk_text, ChunkStream, ProbeKind, TextGenerator, TokenStream};
pub use metrics::{names as metric_names, MetricsSink, NoopMetrics};
pub use types::{Answer, ProviderTier, LOCAL_PROVIDER};
