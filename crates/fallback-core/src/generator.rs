//! The `TextGenerator` capability implemented by every provider.

use crate::context::GenerationContext;
use crate::error::ProviderResult;
use crate::types::ProviderTier;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};

/// Provider-side chunk stream. Each item is a text fragment or the error
/// that terminated the stream.
pub type ChunkStream = BoxStream<'static, ProviderResult<String>>;

/// Caller-facing token stream: lazy, finite and non-restartable.
pub type TokenStream = BoxStream<'static, String>;

/// How expensive an availability probe is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Answered from configuration alone; never cached
    Static,
    /// Requires a network round trip; results are cached briefly
    Network,
}

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Unique provider name, used for breaker state, logs and metrics
    fn name(&self) -> &str;

    /// Priority tier used to order the pipeline
    fn tier(&self) -> ProviderTier;

    /// Probe cost classification
    fn probe_kind(&self) -> ProbeKind {
        ProbeKind::Static
    }

    /// Generate a complete answer for the rendered prompt
    async fn invoke(&self, prompt: &str, context: &GenerationContext) -> ProviderResult<String>;

    /// Whether the provider can currently serve requests
    async fn is_available(&self) -> bool;

    /// Generate an answer as a stream of chunks.
    ///
    /// Failures known before the first chunk (connection, error status)
    /// are returned here rather than as the first stream item.
    ///
    /// The default implementation performs a blocking `invoke` and splits
    /// the result into word chunks.
    async fn stream(&self, prompt: &str, context: &GenerationContext) -> ProviderResult<ChunkStream> {
        let text = self.invoke(prompt, context).await?;
        Ok(Box::pin(stream::iter(chunk_text(&text).into_iter().map(Ok))))
    }
}

/// Split text into word chunks, keeping trailing whitespace attached so
/// concatenating the chunks reproduces the input exactly.
#[must_use]
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_space = false;

    for ch in text.chars() {
        let is_space = ch.is_whitespace();
        if in_space && !is_space && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
        in_space = is_space;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
