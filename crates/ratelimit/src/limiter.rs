use dashmap::DashMap;
use parking_lot::Mutex;
use shardline_core::RateWindowSpec;
use shardline_ports::CounterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::delay::delay_from;

/// Serializes increment-then-sleep for one key
struct KeyQueue {
    turn: tokio::sync::Mutex<()>,
    last_used: Mutex<Instant>,
}

impl KeyQueue {
    fn new() -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

/// Rate limiter over a pluggable counter store
///
/// Cloning is cheap and shares both the store and the per-key queues.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    queues: Arc<DashMap<String, Arc<KeyQueue>>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            queues: Arc::new(DashMap::new()),
        }
    }

    /// Take the next slot on `spec.key` and return how long the caller must
    /// wait for it, without waiting.
    ///
    /// A failing store never blocks progress: the fault is logged and the
    /// caller proceeds immediately.
    pub async fn wait(&self, spec: &RateWindowSpec) -> Duration {
        match self
            .store
            .increment_counter(&spec.key, spec.window, spec.limit)
            .await
        {
            Ok(tick) => delay_from(spec.window, spec.limit, tick.count, tick.ttl),
            Err(e) => {
                warn!(key = %spec.key, error = %e, "Counter store fault, not delaying");
                Duration::ZERO
            }
        }
    }

    /// Take the next slot on `spec.key` and suspend until it is due.
    ///
    /// Callers on the same key queue up behind each other, so a later
    /// caller never computes its delay before an earlier one has slept.
    /// Returns the delay that was served.
    pub async fn acquire(&self, spec: &RateWindowSpec) -> Duration {
        let queue = self.queue(&spec.key);
        let _turn = queue.turn.lock().await;

        let delay = self.wait(spec).await;
        if !delay.is_zero() {
            trace!(key = %spec.key, delay_ms = delay.as_millis() as u64, "Rate limited");
            tokio::time::sleep(delay).await;
        }
        queue.touch();
        delay
    }

    fn queue(&self, key: &str) -> Arc<KeyQueue> {
        if let Some(queue) = self.queues.get(key) {
            return Arc::clone(queue.value());
        }
        Arc::clone(
            self.queues
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(KeyQueue::new()))
                .value(),
        )
    }

    /// Drop the queues of keys nobody is waiting on for which
    /// `should_drop(key, idle)` holds. Returns how many were dropped.
    pub fn sweep<F>(&self, should_drop: F) -> usize
    where
        F: Fn(&str, Duration) -> bool,
    {
        let before = self.queues.len();
        self.queues.retain(|key, queue| {
            let in_use = Arc::strong_count(queue) > 1;
            in_use || !should_drop(key, queue.idle_for())
        });
        before.saturating_sub(self.queues.len())
    }

    /// Drop one key's queue if nobody is waiting on it
    pub fn forget(&self, key: &str) -> bool {
        self.queues
            .remove_if(key, |_, queue| Arc::strong_count(queue) == 1)
            .is_some()
    }

    /// Keys that currently have a queue
    pub fn tracked_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.queues.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.queues.len())
            .finish()
    }
}
