//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one underlying
//! computation. The first caller becomes the producer: its future runs on a
//! detached task so the work survives the producer's caller being dropped.
//! Later callers wait on a watch channel for the producer's result. The slot
//! is removed when the computation finishes, fails, panics or hits the
//! ceiling, so a key can never stay stuck.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Errors surfaced to callers sharing a slot
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DedupError {
    /// The producing task ended without a result (panic or runtime shutdown)
    #[error("in-flight computation was abandoned")]
    Abandoned,

    /// The producing task exceeded the in-flight ceiling
    #[error("in-flight computation exceeded {0:?}")]
    TimedOut(Duration),
}

/// Whether a caller ran the computation or joined someone else's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This caller started the computation
    Producer,
    /// This caller waited on an existing computation
    Waiter,
}

/// Result of joining an in-flight computation
#[derive(Debug, Clone)]
pub struct Joined<T> {
    /// Shared value
    pub value: T,
    /// Role this caller played
    pub role: Role,
}

impl<T> Joined<T> {
    /// Whether this caller started the computation
    #[must_use]
    pub fn is_producer(&self) -> bool {
        self.role == Role::Producer
    }
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Pending,
    Ready(T),
    Abandoned,
    TimedOut,
}

type Slots<T> = Arc<Mutex<HashMap<String, watch::Receiver<Slot<T>>>>>;

/// Removes the slot and wakes waiters, even if the producing future panics
struct SlotGuard<T> {
    slots: Slots<T>,
    key: String,
    tx: watch::Sender<Slot<T>>,
    settled: bool,
}

impl<T> SlotGuard<T> {
    fn settle(mut self, slot: Slot<T>) {
        self.tx.send_replace(slot);
        self.settled = true;
    }
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.tx.send_replace(Slot::Abandoned);
        }
        self.slots.lock().remove(&self.key);
    }
}

/// Map of in-flight computations keyed by request key
pub struct InFlightMap<T> {
    slots: Slots<T>,
    ceiling: Duration,
}

impl<T> InFlightMap<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a map whose computations are bounded by `ceiling`
    #[must_use]
    pub fn new(ceiling: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ceiling,
        }
    }

    /// Upper bound on a single computation
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Number of keys currently being computed
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Run `make()` for `key` unless an identical computation is already in
    /// flight, in which case wait for and share its result.
    ///
    /// `make` is only invoked for the producer.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<Joined<T>, DedupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (mut rx, role) = {
            let mut slots = self.slots.lock();
            if let Some(rx) = slots.get(key) {
                (rx.clone(), Role::Waiter)
            } else {
                let (tx, rx) = watch::channel(Slot::Pending);
                slots.insert(key.to_string(), rx.clone());

                let guard = SlotGuard {
                    slots: Arc::clone(&self.slots),
                    key: key.to_string(),
                    tx,
                    settled: false,
                };
                let ceiling = self.ceiling;
                let fut = make();
                tokio::spawn(async move {
                    match tokio::time::timeout(ceiling, fut).await {
                        Ok(value) => guard.settle(Slot::Ready(value)),
                        Err(_) => {
                            warn!(
                                key = %guard.key,
                                ceiling_ms = ceiling.as_millis() as u64,
                                "In-flight computation exceeded ceiling"
                            );
                            guard.settle(Slot::TimedOut);
                        }
                    }
                });
                (rx, Role::Producer)
            }
        };

        if role == Role::Waiter {
            debug!(event = "dedup_wait", key = %key, "Joining in-flight request");
        }

        let slot = match rx.wait_for(|slot| !matches!(slot, Slot::Pending)).await {
            Ok(slot) => slot.clone(),
            Err(_) => Slot::Abandoned,
        };

        match slot {
            Slot::Ready(value) => Ok(Joined { value, role }),
            Slot::TimedOut => Err(DedupError::TimedOut(self.ceiling)),
            Slot::Pending | Slot::Abandoned => Err(DedupError::Abandoned),
        }
    }
}

impl<T> Default for InFlightMap<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(Duration::from_secs(180))
    }
}
