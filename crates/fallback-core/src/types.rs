//! Shared domain types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider name reported when the deterministic local generator answered.
pub const LOCAL_PROVIDER: &str = "local";

/// Priority tier of a provider. Pipelines are ordered by tier, then by
/// registration order within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    /// Paid / primary hosted API
    #[default]
    Primary,
    /// Secondary hosted API
    Secondary,
    /// Local inference
    Local,
}

impl ProviderTier {
    /// Label for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result returned to callers of `process`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Generated text, never empty
    pub text: String,
    /// Name of the provider that produced the text, or `"local"`
    pub provider: String,
    /// Whether the answer was served from the response cache
    pub used_cache: bool,
}

impl Answer {
    /// Create a freshly generated answer
    pub fn generated(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            used_cache: false,
        }
    }

    /// Create an answer served from cache
    pub fn cached(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            used_cache: true,
        }
    }

    /// Whether the local generator produced this answer
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.provider == LOCAL_PROVIDER
    }
}
