//! Streaming variant of `process`.

use crate::orchestrator::FallbackOrchestrator;
use async_stream::stream;
use fallback_core::{
    chunk_text, metric_names, Answer, GenerationContext, ProviderError, TokenStream, LOCAL_PROVIDER,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

impl FallbackOrchestrator {
    /// Answer `message` as a lazy, finite stream of text chunks.
    ///
    /// A cached answer is replayed in word chunks. Otherwise providers are
    /// tried in pipeline order: a provider that fails before producing any
    /// output hands over to the next one, while a failure after partial
    /// output ends the stream. Text from a clean run is cached. If no
    /// provider produces output the local answer is streamed and cached.
    ///
    /// Streams are not deduplicated. Dropping the stream stops the work.
    #[must_use]
    pub fn process_stream(&self, message: &str, context: Option<GenerationContext>) -> TokenStream {
        let inner = Arc::clone(&self.inner);
        let message = message.to_string();
        let context = context.unwrap_or_default();

        Box::pin(stream! {
            if message.trim().is_empty() {
                let answer = Answer::generated(inner.local.answer(&message, &context), LOCAL_PROVIDER);
                inner.record_outcome(&answer);
                for chunk in chunk_text(&answer.text) {
                    yield chunk;
                }
                return;
            }

            let key = inner.cache.key_for(&message, &context);
            if let Some(hit) = inner.cache.get(&key).await {
                inner.record_outcome(&Answer::cached(hit.text.clone(), hit.provider));
                for chunk in chunk_text(&hit.text) {
                    yield chunk;
                }
                return;
            }

            let prompt = inner.prompt.render(&message, &context);
            let candidates = inner.pipeline.candidates().await;
            let mut failed: Option<String> = None;

            for provider in &candidates {
                let name = provider.name();
                if !inner.breakers.allow(name) {
                    inner.cooldown_skip(name);
                    continue;
                }
                if let Some(from) = failed.take() {
                    inner.record_fallback(&from, name);
                }

                let mut chunks = match inner.executor.open_stream(provider.as_ref(), &prompt, &context).await {
                    Ok(chunks) => chunks,
                    Err(error) => {
                        warn!(provider = %name, error_kind = %error.kind(), error = %error, "Stream could not be opened");
                        failed = Some(name.to_string());
                        continue;
                    }
                };

                let mut collected = String::new();
                let mut interrupted = None;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) if chunk.is_empty() => {}
                        Ok(chunk) => {
                            collected.push_str(&chunk);
                            yield chunk;
                        }
                        Err(error) => {
                            interrupted = Some(error);
                            break;
                        }
                    }
                }

                if interrupted.is_none() && !collected.trim().is_empty() {
                    inner.breakers.record_success(name);
                    inner.cache.set(&key, &collected, name, inner.cache.ttl_for(&message)).await;
                    inner.record_outcome(&Answer::generated(collected, name));
                    return;
                }

                let error = interrupted
                    .unwrap_or_else(|| ProviderError::invalid_response(name, "stream ended without output"));
                inner.breakers.record_failure(name);
                warn!(
                    provider = %name,
                    error_kind = %error.kind(),
                    error = %error,
                    partial_output = !collected.trim().is_empty(),
                    "Stream failed"
                );

                if !collected.trim().is_empty() {
                    inner.metrics.increment(metric_names::REQUESTS_TOTAL, &[("outcome", "stream_interrupted")]);
                    return;
                }
                failed = Some(name.to_string());
            }

            if let Some(from) = failed {
                inner.record_fallback(&from, LOCAL_PROVIDER);
            }
            info!(event = "local_fallback", reason = "stream_exhausted", "Streaming local answer");
            let text = inner.local.answer(&message, &context);
            inner.cache.set(&key, &text, LOCAL_PROVIDER, inner.cache.fallback_ttl()).await;
            inner.record_outcome(&Answer::generated(text.clone(), LOCAL_PROVIDER));
            for chunk in chunk_text(&text) {
                yield chunk;
            }
        })
    }
}
