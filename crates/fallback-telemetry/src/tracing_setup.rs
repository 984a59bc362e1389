//! Structured logging setup.
//!
//! Installs a `tracing` subscriber with an `EnvFilter` (falling back to the
//! configured level when `RUST_LOG` is unset) and either a human-readable or
//! a JSON formatter.

use fallback_config::TelemetrySettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name reported at startup
    pub service_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of pretty text
    pub json: bool,
    /// Include source file and line in records
    pub with_source_location: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "llm-fallback-gateway".to_string(),
            log_level: "info".to_string(),
            json: false,
            with_source_location: false,
        }
    }
}

impl TracingConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Include file and line numbers
    #[must_use]
    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.with_source_location = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

impl From<&TelemetrySettings> for TracingConfig {
    fn from(settings: &TelemetrySettings) -> Self {
        Self::default()
            .with_log_level(settings.log_level.clone())
            .with_json(settings.json_logs)
    }
}

/// Initialize the global subscriber
///
/// # Errors
/// Returns error if a global subscriber is already installed
pub fn init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    let registry = tracing_subscriber::registry();

    if config.json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location)
            .with_filter(config.filter());
        registry
            .with(layer)
            .try_init()
            .map_err(|e| TracingError::Init(e.to_string()))?;
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location)
            .with_filter(config.filter());
        registry
            .with(layer)
            .try_init()
            .map_err(|e| TracingError::Init(e.to_string()))?;
    }

    info!(
        service = %config.service_name,
        log_level = %config.log_level,
        json = config.json,
        "Logging initialized"
    );
    Ok(())
}

/// Tracing initialization error
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Failed to initialize tracing
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}
