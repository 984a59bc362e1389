//! Integration tests for the LLM fallback gateway
//!
//! Exercises the orchestrator end to end against wiremock servers standing
//! in for OpenAI-compatible and Ollama endpoints:
//! - Provider fallback and circuit breaking
//! - Response caching and in-flight deduplication
//! - Streaming
//! - Configuration loading

pub mod helpers;
pub mod mock_providers;

// Re-export commonly used items
pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod fallback_tests;
#[cfg(test)]
mod streaming_tests;
