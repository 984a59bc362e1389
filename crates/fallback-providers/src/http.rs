//! HTTP plumbing shared by the hosted providers.

use fallback_core::{ProviderError, ProviderResult};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::warn;

const MAX_ERROR_BODY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a pooled HTTP client.
///
/// `ceiling` bounds a whole request. Callers impose the shorter,
/// per-attempt deadline themselves.
pub(crate) fn build_client(provider: &str, ceiling: Duration) -> ProviderResult<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(ceiling))
        .timeout(ceiling)
        .pool_max_idle_per_host(16)
        .build()
        .map_err(|e| {
            ProviderError::configuration(provider, format!("Failed to create HTTP client: {e}"))
        })
}

/// Map a send/receive failure to the provider taxonomy.
pub(crate) fn map_request_error(provider: &str, timeout: Duration, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(provider, timeout)
    } else if err.is_decode() {
        ProviderError::invalid_response(provider, format!("Failed to decode body: {err}"))
    } else {
        ProviderError::transport(provider, format!("Request failed: {err}"))
    }
}

/// Pass successful responses through; turn error statuses into transport errors.
pub(crate) async fn check_status(provider: &str, response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = truncate(&body, MAX_ERROR_BODY);
    warn!(provider = %provider, status = %status, body = %body, "Provider returned error status");

    Err(ProviderError::transport(
        provider,
        format!("HTTP {}: {body}", status.as_u16()),
    ))
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let mut out: String = trimmed.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}
