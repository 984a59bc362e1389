//! # Fallback Providers
//!
//! Text-generation backends and the ordered provider pipeline:
//! - OpenAI-compatible chat completions (OpenAI, Groq, Together, vLLM, ...)
//! - Ollama for local inference
//! - A deterministic local generator used as the last resort
//! - Tier-ordered pipeline with cached availability probes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod http;

pub mod factory;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod pipeline;

pub use factory::{build_provider, build_providers, request_ceiling};
pub use local::{extract_intents, extract_tickers, Intent, LocalGenerator};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiCompatibleProvider, OpenAiConfig};
pub use pipeline::{ProviderAvailability, ProviderPipeline, DEFAULT_PROBE_TTL};
