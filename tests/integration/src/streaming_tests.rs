//! Streaming tests
//!
//! `process_stream` against an SSE-speaking mock provider.

use crate::helpers::*;
use crate::mock_providers::*;
use fallback_core::{metric_names as names, Answer, GenerationContext, LOCAL_PROVIDER};
use futures::StreamExt;
use pretty_assertions::assert_eq;

/// Deltas are forwarded in order, then replayed from cache
#[tokio::test]
async fn test_stream_forwards_deltas_and_caches() {
    let openai = MockOpenAI::new().await;
    openai.mock_stream(&["BTC ", "is ", "up."]).await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, _) = build(&config);

    let chunks: Vec<String> = orchestrator.process_stream("Analyze BTC", None).collect().await;
    assert_eq!(chunks, vec!["BTC ", "is ", "up."]);

    // Same question again: served from cache, no second upstream call
    let answer = orchestrator.process("Analyze BTC", None).await;
    assert_eq!(answer, Answer::cached("BTC is up.", "openai"));
}

/// A provider rejecting the stream before any output hands over to the next tier
#[tokio::test]
async fn test_stream_falls_back_when_provider_rejects() {
    let openai = MockOpenAI::new().await;
    openai.mock_server_error(2).await;
    let ollama = MockOllama::new().await;
    ollama.mock_tags().await;

    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/api/generate"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
            concat!(
                r#"{"response":"SOL ","done":false}"#,
                "\n",
                r#"{"response":"is volatile.","done":false}"#,
                "\n",
                r#"{"response":"","done":true}"#,
                "\n"
            ),
            "application/x-ndjson",
        ))
        .expect(1)
        .mount(&ollama.server)
        .await;

    let mut config = base_config();
    config.providers = vec![
        openai_entry("openai", &openai.url()),
        ollama_entry("ollama", &ollama.url()),
    ];
    let (orchestrator, _) = build(&config);

    let text = orchestrator
        .process_stream("Analyze SOL", None)
        .collect::<Vec<_>>()
        .await
        .concat();

    assert_eq!(text, "SOL is volatile.");
}

/// A rejected stream open is retried against the same provider
#[tokio::test]
async fn test_stream_open_is_retried() {
    let openai = MockOpenAI::new().await;
    openai.mock_server_error_once().await;
    openai.mock_stream(&["BTC ", "recovered."]).await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, metrics) = build(&config);

    let text = orchestrator
        .process_stream("Analyze BTC", None)
        .collect::<Vec<_>>()
        .await
        .concat();

    assert_eq!(text, "BTC recovered.");
    assert_eq!(openai.request_count().await, 2);
    assert_eq!(
        metrics.counter(
            names::PROVIDER_FAILURES_TOTAL,
            &[("provider", "openai"), ("error_kind", "transport")]
        ),
        1
    );
    assert_eq!(
        orchestrator.breakers().breaker("openai").stats().consecutive_failures,
        0
    );
}

/// With nothing reachable the local answer is streamed and cached
#[tokio::test]
async fn test_stream_local_fallback() {
    let config = base_config();
    let (orchestrator, _) = build(&config);

    let text = orchestrator
        .process_stream("Is ETH risky?", None)
        .collect::<Vec<_>>()
        .await
        .concat();

    assert!(text.contains("ETH"));
    let cache = orchestrator.cache();
    let entry = cache
        .peek(&cache.key_for("Is ETH risky?", &GenerationContext::new()))
        .await
        .expect("local answer cached");
    assert_eq!(entry.provider, LOCAL_PROVIDER);
    assert_eq!(entry.text, text);
}
