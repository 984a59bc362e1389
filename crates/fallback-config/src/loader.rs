//! Configuration loading from files and environment.

use crate::error::{ConfigError, Result};
use crate::model::AppConfig;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FALLBACK_";

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML
    Toml,
    /// YAML
    Yaml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(format!(
                "'{other}' ({})",
                path.display()
            ))),
        }
    }
}

impl AppConfig {
    /// Parse configuration text in the given format.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    /// Apply `FALLBACK_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply `FALLBACK_*` overrides using `lookup` to resolve variables.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let var = format!("{ENV_PREFIX}{name}");
            lookup(&var).map(|value| (var, value))
        };

        if let Some((_, v)) = get("LOG_LEVEL") {
            self.telemetry.log_level = v;
        }
        if let Some((var, v)) = get("JSON_LOGS") {
            self.telemetry.json_logs = parse_value(&var, &v)?;
        }
        if let Some((var, v)) = get("RETRY_MAX_RETRIES") {
            self.retry.max_retries = parse_value(&var, &v)?;
        }
        if let Some((var, v)) = get("RETRY_BASE_DELAY") {
            self.retry.base_delay = parse_duration(&var, &v)?;
        }
        if let Some((var, v)) = get("RETRY_MAX_DELAY") {
            self.retry.max_delay = parse_duration(&var, &v)?;
        }
        if let Some((var, v)) = get("CB_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = parse_value(&var, &v)?;
        }
        if let Some((var, v)) = get("CB_COOLDOWN") {
            self.circuit_breaker.cooldown = parse_duration(&var, &v)?;
        }
        if let Some((var, v)) = get("TIMEOUT_INITIAL") {
            self.timeout.initial = parse_duration(&var, &v)?;
        }
        if let Some((var, v)) = get("TIMEOUT_MAX") {
            self.timeout.max = parse_duration(&var, &v)?;
        }
        if let Some((var, v)) = get("CACHE_ENABLED") {
            self.cache.enabled = parse_value(&var, &v)?;
        }
        if let Some((var, v)) = get("DEDUP_CEILING") {
            self.dedup.in_flight_ceiling = parse_duration(&var, &v)?;
        }

        Ok(self)
    }
}

fn parse_value<T>(var: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::env(var, e.to_string()))
}

fn parse_duration(var: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::env(var, e.to_string()))
}

/// Load, override and validate configuration from `path`.
pub async fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;

    debug!(path = %path.display(), ?format, "Loading configuration");
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let config = AppConfig::parse(&content, format)?.apply_env_overrides()?;
    config.validate()?;

    info!(
        path = %path.display(),
        providers = config.providers.len(),
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;
    use fallback_core::ProviderTier;
    use std::collections::HashMap;
    use std::io::Write;

    const TOML_CONFIG: &str = r#"
[[providers]]
name = "openai"
kind = "openai_compatible"
model = "gpt-4o-mini"
api_key = "sk-test"
timeout = "20s"

[[providers]]
name = "ollama"
kind = "ollama"
tier = "local"
model = "llama3"
base_url = "http://localhost:11434"

[circuit_breaker]
failure_threshold = 3
cooldown = "10s"

[cache]
short_prompt_ttl = "2h"
"#;

    #[test]
    fn test_parse_toml() {
        let config = AppConfig::parse(TOML_CONFIG, ConfigFormat::Toml).expect("valid toml");

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].kind, ProviderKind::OpenaiCompatible);
        assert_eq!(config.providers[0].timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.providers[1].tier, ProviderTier::Local);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(10));
        // untouched fields keep defaults
        assert_eq!(config.circuit_breaker.max_cooldown, Duration::from_secs(300));
        assert_eq!(config.cache.short_prompt_ttl, Duration::from_secs(7200));
        config.validate().expect("valid config");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r"
providers:
  - name: groq
    kind: openai_compatible
    tier: secondary
    model: llama-3.1-8b-instant
    api_key_env: GROQ_API_KEY
retry:
  max_retries: 2
  base_delay: 500ms
";
        let config = AppConfig::parse(yaml, ConfigFormat::Yaml).expect("valid yaml");
        assert_eq!(config.providers[0].tier, ProviderTier::Secondary);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            ConfigFormat::from_path(Path::new("config.ini")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert_eq!(
            ConfigFormat::from_path(Path::new("config.YML")).expect("yaml"),
            ConfigFormat::Yaml
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FALLBACK_LOG_LEVEL", "debug"),
            ("FALLBACK_RETRY_MAX_RETRIES", "5"),
            ("FALLBACK_CB_COOLDOWN", "45s"),
            ("FALLBACK_CACHE_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::default()
            .with_overrides(|var| vars.get(var).map(ToString::to_string))
            .expect("valid overrides");

        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(45));
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_bad_env_override() {
        let err = AppConfig::default()
            .with_overrides(|var| (var == "FALLBACK_RETRY_MAX_RETRIES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "FALLBACK_RETRY_MAX_RETRIES"));
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(TOML_CONFIG.as_bytes()).expect("write");

        let config = load_config(file.path()).await.expect("loads");
        assert_eq!(config.providers.len(), 2);
    }

    #[tokio::test]
    async fn test_load_config_rejects_invalid() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(b"[retry]\nmax_retries = 0\n").expect("write");

        assert!(matches!(
            load_config(file.path()).await,
            Err(ConfigError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_load_config_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/fallback.toml").await,
            Err(ConfigError::Io { .. })
        ));
    }
}
