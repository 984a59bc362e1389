//! End-to-end fallback tests
//!
//! Orchestrator built from configuration, talking HTTP to mock providers.

use crate::helpers::*;
use crate::mock_providers::*;
use fallback_core::{metric_names as names, Answer, GenerationContext, MetricsSink, LOCAL_PROVIDER};
use fallback_orchestrator::FallbackOrchestrator;
use fallback_resilience::CircuitState;
use fallback_telemetry::PrometheusMetrics;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

/// Primary provider answers directly
#[tokio::test]
async fn test_primary_provider_answers() {
    let openai = MockOpenAI::new().await;
    openai.mock_completion("BTC is consolidating.", 1).await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, metrics) = build(&config);

    let answer = orchestrator.process("Analyze BTC", None).await;

    assert_eq!(answer, Answer::generated("BTC is consolidating.", "openai"));
    assert_eq!(metrics.counter(names::REQUESTS_TOTAL, &[("outcome", "success")]), 1);
}

/// Server errors exhaust the primary's retries, then the next tier answers
#[tokio::test]
async fn test_server_error_falls_back_to_ollama() {
    let openai = MockOpenAI::new().await;
    openai.mock_server_error(2).await;
    let ollama = MockOllama::new().await;
    ollama.mock_tags().await;
    ollama.mock_generate("ETH is flat.", 1).await;

    let mut config = base_config();
    config.providers = vec![
        openai_entry("openai", &openai.url()),
        ollama_entry("ollama", &ollama.url()),
    ];
    let (orchestrator, metrics) = build(&config);

    let answer = orchestrator.process("Analyze ETH", None).await;

    assert_eq!(answer, Answer::generated("ETH is flat.", "ollama"));
    assert_eq!(
        metrics.counter(names::PROVIDER_FALLBACKS_TOTAL, &[("from", "openai"), ("to", "ollama")]),
        1
    );
    assert_eq!(
        metrics.counter(
            names::PROVIDER_FAILURES_TOTAL,
            &[("provider", "openai"), ("error_kind", "transport")]
        ),
        2
    );
    assert_eq!(
        orchestrator.breakers().breaker("openai").stats().consecutive_failures,
        2
    );
}

/// A daemon failing its probe is left out; everything failing ends locally
#[tokio::test]
async fn test_unavailable_ollama_is_filtered_out() {
    let openai = MockOpenAI::new().await;
    openai.mock_server_error(2).await;
    let ollama = MockOllama::new().await;
    ollama.mock_tags_down().await;
    ollama.mock_generate("never", 0).await;

    let mut config = base_config();
    config.providers = vec![
        openai_entry("openai", &openai.url()),
        ollama_entry("ollama", &ollama.url()),
    ];
    let (orchestrator, metrics) = build(&config);

    let answer = orchestrator.process("Should I buy SOL?", None).await;

    assert_eq!(answer.provider, LOCAL_PROVIDER);
    assert!(answer.text.contains("SOL"));
    assert_eq!(
        metrics.counter(names::PROVIDER_FALLBACKS_TOTAL, &[("from", "openai"), ("to", "local")]),
        1
    );

    let health = orchestrator.provider_health().await;
    assert_eq!(health.len(), 2);
    assert!(health[0].available);
    assert!(!health[1].available);
}

/// Three identical concurrent requests reach the provider once
#[tokio::test]
async fn test_concurrent_identical_requests_are_deduplicated() {
    let openai = MockOpenAI::new().await;
    openai
        .mock_completion_delayed("Shared answer.", Duration::from_millis(200), 1)
        .await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, _) = build(&config);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.process("Analyze BTC", None).await })
        })
        .collect();

    let mut answers = Vec::new();
    for handle in handles {
        answers.push(handle.await.expect("task completed"));
    }

    assert_eq!(openai.request_count().await, 1);
    for answer in &answers {
        assert_eq!(answer.text, "Shared answer.");
        assert_eq!(answer.provider, "openai");
    }
    assert_eq!(orchestrator.in_flight_count(), 0);
}

/// Repeating a question is served from the cache
#[tokio::test]
async fn test_repeat_question_hits_cache() {
    let openai = MockOpenAI::new().await;
    openai.mock_completion("Cached answer.", 1).await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, metrics) = build(&config);

    let first = orchestrator.process("Analyze BTC", None).await;
    let second = orchestrator.process("analyze btc", None).await;

    assert!(!first.used_cache);
    assert_eq!(second, Answer::cached("Cached answer.", "openai"));
    assert_eq!(metrics.counter(names::CACHE_REQUESTS_TOTAL, &[("result", "hit")]), 1);
    assert_eq!(orchestrator.cache().stats().hits, 1);
}

/// Context values reach the rendered prompt
#[tokio::test]
async fn test_context_is_rendered_into_prompt() {
    let openai = MockOpenAI::new().await;
    openai.mock_completion("ok", 1).await;

    let mut config = base_config();
    config.prompt.system_preamble = "You are a test assistant.".to_string();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, _) = build(&config);

    let context = GenerationContext::new().with("price", 64_000).with("symbol", "BTC");
    orchestrator.process("Analyze BTC", Some(context)).await;

    let body = openai.first_request_body().await.expect("request recorded");
    let prompt = body.to_string();
    assert!(prompt.contains("You are a test assistant."));
    assert!(prompt.contains("price: 64000"));
    assert!(prompt.contains("User: Analyze BTC"));
}

/// Whitespace-only responses are retried and never cached as success
#[tokio::test]
async fn test_blank_response_is_a_failure() {
    let openai = MockOpenAI::new().await;
    openai.mock_blank_completion().await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, metrics) = build(&config);

    let answer = orchestrator.process("Analyze BTC", None).await;

    assert!(answer.is_local());
    assert_eq!(openai.request_count().await, 2);
    assert_eq!(
        metrics.counter(
            names::PROVIDER_FAILURES_TOTAL,
            &[("provider", "openai"), ("error_kind", "invalid_response")]
        ),
        2
    );
}

/// An open circuit skips the provider without calling it
#[tokio::test]
async fn test_open_circuit_skips_provider() {
    let openai = MockOpenAI::new().await;
    openai.mock_server_error(1).await;
    let ollama = MockOllama::new().await;
    ollama.mock_tags().await;
    ollama.mock_generate("from ollama", 2).await;

    let mut config = base_config();
    config.circuit_breaker.failure_threshold = 1;
    config.providers = vec![
        openai_entry("openai", &openai.url()),
        ollama_entry("ollama", &ollama.url()),
    ];
    let (orchestrator, metrics) = build(&config);

    orchestrator.process("first question", None).await;
    assert_eq!(orchestrator.breakers().state("openai"), CircuitState::Open);

    let answer = orchestrator.process("second question", None).await;

    assert_eq!(answer.provider, "ollama");
    assert_eq!(metrics.counter(names::COOLDOWN_SKIPS_TOTAL, &[("provider", "openai")]), 1);
}

/// Prometheus exposition reflects processed requests
#[tokio::test]
async fn test_prometheus_metrics_end_to_end() {
    let openai = MockOpenAI::new().await;
    openai.mock_completion("ok", 1).await;

    let mut config = base_config();
    config.providers = vec![openai_entry("openai", &openai.url())];
    let metrics = Arc::new(PrometheusMetrics::new("it"));
    let orchestrator =
        FallbackOrchestrator::from_config(&config, Arc::clone(&metrics) as Arc<dyn MetricsSink>);

    orchestrator.process("Analyze BTC", None).await;
    orchestrator.process("Analyze BTC", None).await;

    let text = metrics.gather_text().expect("metrics render");
    assert!(text.contains(r#"it_requests_total{outcome="success"} 1"#));
    assert!(text.contains(r#"it_requests_total{outcome="cache_hit"} 1"#));
    assert!(text.contains(r#"it_provider_attempts_total{outcome="success",provider="openai"} 1"#));
}

/// A provider slower than its starting timeout answers once the timeout
/// has adapted, as long as it stays under the configured maximum
#[tokio::test]
async fn test_adaptive_timeout_lets_slow_provider_answer() {
    let openai = MockOpenAI::new().await;
    openai
        .mock_completion_delayed("slow but fine", Duration::from_millis(300), 2)
        .await;

    let mut config = base_config();
    config.retry.max_retries = 3;
    config.timeout.initial = Duration::from_millis(200);
    config.timeout.max = Duration::from_secs(2);
    config.timeout.growth_factor = 2.0;
    config.providers = vec![
        openai_entry("openai", &openai.url()).with_timeout(Duration::from_millis(200)),
    ];
    let (orchestrator, metrics) = build(&config);

    let answer = orchestrator.process("Analyze BTC", None).await;

    assert_eq!(answer, Answer::generated("slow but fine", "openai"));
    assert_eq!(openai.request_count().await, 2);
    assert_eq!(
        metrics.counter(names::ADAPTIVE_TIMEOUTS_TOTAL, &[("provider", "openai")]),
        1
    );
    assert_eq!(
        metrics.counter(
            names::PROVIDER_FAILURES_TOTAL,
            &[("provider", "openai"), ("error_kind", "timeout")]
        ),
        1
    );
}

/// After the cooldown a single trial request goes through and closes the circuit
#[tokio::test]
async fn test_circuit_recovers_after_cooldown() {
    let openai = MockOpenAI::new().await;
    openai.mock_server_error_once().await;
    openai.mock_completion("back online", 1).await;

    let mut config = base_config();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.cooldown = Duration::from_millis(200);
    config.providers = vec![openai_entry("openai", &openai.url())];
    let (orchestrator, _) = build(&config);

    let first = orchestrator.process("first question", None).await;
    assert_eq!(first.provider, LOCAL_PROVIDER);
    assert_eq!(orchestrator.breakers().state("openai"), CircuitState::Open);

    let skipped = orchestrator.process("second question", None).await;
    assert_eq!(skipped.provider, LOCAL_PROVIDER);
    assert_eq!(openai.request_count().await, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let recovered = orchestrator.process("third question", None).await;

    assert_eq!(recovered, Answer::generated("back online", "openai"));
    assert_eq!(openai.request_count().await, 2);
    assert_eq!(orchestrator.breakers().state("openai"), CircuitState::Closed);
}
