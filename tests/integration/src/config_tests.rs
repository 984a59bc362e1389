//! Configuration loading tests
//!
//! A configuration file on disk drives provider registration end to end.

use crate::helpers::*;
use crate::mock_providers::*;
use fallback_config::load_config;
use fallback_core::ProviderTier;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

/// TOML file with two providers, one missing its key
#[tokio::test]
async fn test_toml_config_builds_pipeline() {
    let openai = MockOpenAI::new().await;
    openai.mock_completion("from config", 1).await;

    let toml = format!(
        r#"
[[providers]]
name = "openai"
kind = "openai_compatible"
model = "gpt-4o-mini"
api_key = "sk-test"
base_url = "{url}"

[[providers]]
name = "groq"
kind = "openai_compatible"
tier = "secondary"
model = "llama-3.1-8b-instant"
api_key_env = "FALLBACK_IT_UNSET_GROQ_KEY"

[retry]
max_retries = 2
base_delay = "10ms"
max_delay = "20ms"

[cache]
short_prompt_ttl = "2h"
long_prompt_ttl = "5m"
"#,
        url = openai.url()
    );

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(toml.as_bytes()).expect("write config");

    let config = load_config(file.path()).await.expect("config loads");
    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.retry.base_delay, Duration::from_millis(10));

    let (orchestrator, _) = build(&config);
    let tiers = orchestrator.pipeline().tiers();
    assert_eq!(tiers, vec![("openai".to_string(), ProviderTier::Primary)]);

    let answer = orchestrator.process("Analyze BTC", None).await;
    assert_eq!(answer.provider, "openai");
    assert_eq!(orchestrator.cache().ttl_for("Analyze BTC"), Duration::from_secs(7200));
}
