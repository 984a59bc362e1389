//! # Fallback Config
//!
//! Configuration for the LLM fallback gateway: provider entries, resilience
//! tuning, cache TTL policy, telemetry and prompt templating. Loaded from
//! TOML, YAML or JSON with `FALLBACK_*` environment overrides.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, Result};
pub use loader::{load_config, ConfigFormat, ENV_PREFIX};
pub use model::{
    AppConfig, CacheSettings, CircuitBreakerSettings, DedupSettings, PipelineSettings,
    PromptSettings, ProviderConfig, ProviderKind, RetrySettings, TelemetrySettings,
    TimeoutSettings,
};
pub use secrecy::{ExposeSecret, SecretString};
