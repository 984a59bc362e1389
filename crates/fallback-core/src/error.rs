//! Error types for provider invocation.
//!
//! Every failure a provider can produce maps onto one of four kinds. The
//! first three are transient and retried by the executor; configuration
//! errors are raised while the pipeline is being assembled and never at
//! request time.

use std::fmt;
use std::time::Duration;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider invocation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Connection-level failure (DNS, refused connection, 5xx, rate limiting)
    #[error("Transport error from provider '{provider}': {message}")]
    Transport {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// The attempt exceeded the provider's current timeout
    #[error("Provider '{provider}' timed out after {timeout:?}")]
    Timeout {
        /// Provider name
        provider: String,
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Empty or malformed payload
    #[error("Invalid response from provider '{provider}': {message}")]
    InvalidResponse {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Provider cannot be used with the current configuration
    #[error("Provider '{provider}' is misconfigured: {message}")]
    Configuration {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },
}

impl ProviderError {
    /// Create a transport error
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(provider: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            timeout,
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Name of the provider that produced this error
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Transport { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::Configuration { provider, .. } => provider,
        }
    }

    /// Error kind used as a log field and metric label
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether another attempt against the same provider may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration { .. })
    }
}

/// Coarse classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection-level failure
    Transport,
    /// Attempt timed out
    Timeout,
    /// Empty or malformed payload
    InvalidResponse,
    /// Unusable configuration
    Configuration,
}

impl ErrorKind {
    /// Stable label for logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
