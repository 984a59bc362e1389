//! Scripted providers for orchestrator tests.

use async_trait::async_trait;
use fallback_core::{
    chunk_text, ChunkStream, GenerationContext, ProviderError, ProviderResult, ProviderTier,
    TextGenerator,
};
use futures::stream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provider whose replies are fixed up front
pub struct Scripted {
    name: &'static str,
    tier: ProviderTier,
    reply: Option<String>,
    delay: Option<Duration>,
    available: AtomicBool,
    broken: AtomicBool,
    stream_items: Mutex<Option<Vec<ProviderResult<String>>>>,
    calls: AtomicU32,
}

impl Scripted {
    /// Always answers `text`
    pub fn ok(name: &'static str, text: &str) -> Self {
        Self::build(name, Some(text.to_string()))
    }

    /// Always fails with a transport error
    pub fn failing(name: &'static str) -> Self {
        Self::build(name, None)
    }

    fn build(name: &'static str, reply: Option<String>) -> Self {
        Self {
            name,
            tier: ProviderTier::Primary,
            reply,
            delay: None,
            available: AtomicBool::new(true),
            broken: AtomicBool::new(false),
            stream_items: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_tier(mut self, tier: ProviderTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    /// While broken, every call fails with a transport error
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    /// The next `stream` call yields exactly these items
    pub fn with_stream(self, items: Vec<ProviderResult<String>>) -> Self {
        *self.stream_items.lock() = Some(items);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn tier(&self) -> ProviderTier {
        self.tier
    }

    async fn invoke(&self, _prompt: &str, _context: &GenerationContext) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProviderError::transport(self.name, "connection refused"));
        }
        self.reply
            .clone()
            .ok_or_else(|| ProviderError::transport(self.name, "HTTP 503: unavailable"))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn stream(&self, prompt: &str, context: &GenerationContext) -> ProviderResult<ChunkStream> {
        let scripted = self.stream_items.lock().take();
        if let Some(items) = scripted {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Ok(Box::pin(stream::iter(items)));
        }
        let text = self.invoke(prompt, context).await?;
        Ok(Box::pin(stream::iter(chunk_text(&text).into_iter().map(Ok))))
    }
}

/// Coerce scripted providers into pipeline entries
pub fn providers(list: &[&Arc<Scripted>]) -> Vec<Arc<dyn TextGenerator>> {
    list.iter()
        .map(|p| Arc::clone(*p) as Arc<dyn TextGenerator>)
        .collect()
}
