//! # LLM Fallback Gateway
//!
//! Reads one request per line from stdin and writes one JSON answer per
//! line to stdout. A line is either plain text or a JSON object
//! `{"message": "...", "context": {...}}`.
//!
//! ## Usage
//!
//! ```bash
//! # Default configuration (no remote providers, local answers only)
//! echo "Analyze BTC" | llm-fallback-gateway
//!
//! # Custom config file
//! FALLBACK_CONFIG=/path/to/config.toml llm-fallback-gateway
//!
//! # Stream answers chunk by chunk
//! llm-fallback-gateway --stream
//! ```

use anyhow::Context;
use fallback_config::{load_config, AppConfig};
use fallback_core::{GenerationContext, MetricsSink};
use fallback_orchestrator::FallbackOrchestrator;
use fallback_telemetry::{init_tracing, PrometheusMetrics, TracingConfig};
use futures::StreamExt;
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "FALLBACK_CONFIG";

#[derive(Debug, Deserialize)]
struct Request {
    message: String,
    #[serde(default)]
    context: Option<GenerationContext>,
}

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Application failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = match env::var(CONFIG_ENV) {
        Ok(path) => load_config(&path)
            .await
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => {
            let config = AppConfig::default().apply_env_overrides()?;
            config.validate()?;
            config
        }
    };

    if let Err(e) = init_tracing(&TracingConfig::from(&config.telemetry)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        providers = config.providers.len(),
        "Starting LLM fallback gateway"
    );

    let metrics = Arc::new(PrometheusMetrics::new(&config.telemetry.metrics_namespace));
    let orchestrator =
        FallbackOrchestrator::from_config(&config, Arc::clone(&metrics) as Arc<dyn MetricsSink>);

    for health in orchestrator.provider_health().await {
        info!(
            provider = %health.name,
            tier = %health.tier,
            available = health.available,
            circuit = %health.circuit.state.as_str(),
            "Provider status"
        );
    }

    let streaming = env::args().skip(1).any(|arg| arg == "--stream");
    serve(&orchestrator, streaming).await?;

    match metrics.gather_text() {
        Ok(text) => debug!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }
    info!("Input closed, shutting down");
    Ok(())
}

async fn serve(orchestrator: &FallbackOrchestrator, streaming: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let request = parse_request(&line);

        if streaming {
            let mut chunks = orchestrator.process_stream(&request.message, request.context);
            while let Some(chunk) = chunks.next().await {
                stdout.write_all(chunk.as_bytes()).await?;
                stdout.flush().await?;
            }
            stdout.write_all(b"\n").await?;
        } else {
            let answer = orchestrator.process(&request.message, request.context).await;
            let mut out = serde_json::to_vec(&answer)?;
            out.push(b'\n');
            stdout.write_all(&out).await?;
        }
        stdout.flush().await?;
    }
    Ok(())
}

fn parse_request(line: &str) -> Request {
    if line.trim_start().starts_with('{') {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => return request,
            Err(e) => warn!(error = %e, "Line is not a valid request object, using it as text"),
        }
    }
    Request {
        message: line.to_string(),
        context: None,
    }
}
