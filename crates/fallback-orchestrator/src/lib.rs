//! # Fallback Orchestrator
//!
//! Answers `process(message, context)` by composing the resilience layer:
//! response cache lookup, in-flight deduplication, tier-ordered providers
//! guarded by circuit breakers and retries, and a deterministic local
//! answer when every provider is skipped or exhausted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod orchestrator;
pub mod prompt;
mod stream;

#[cfg(test)]
mod testing;

pub use orchestrator::{FallbackOrchestrator, OrchestratorBuilder, ProviderHealth};
pub use prompt::PromptTemplate;
