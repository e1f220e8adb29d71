//! Limiter behavior against the in-memory store, on tokio's paused clock.

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use shardline_core::RateWindowSpec;
use shardline_ports::{CounterStore, CounterTick, StoreError, StoreResult};
use shardline_ratelimit::{RateLimiter, gate};
use shardline_store::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn limiter() -> RateLimiter {
    RateLimiter::new(Arc::new(InMemoryStore::new()))
}

fn spec(key: &str, window_ms: u64, limit: u32) -> RateWindowSpec {
    RateWindowSpec::new(key, Duration::from_millis(window_ms), limit)
}

#[tokio::test(start_paused = true)]
async fn test_three_back_to_back_calls() {
    let limiter = limiter();
    let k = spec("k", 1000, 2);

    let delays = [
        limiter.wait(&k).await,
        limiter.wait(&k).await,
        limiter.wait(&k).await,
    ];
    assert_eq!(
        delays,
        [Duration::ZERO, Duration::ZERO, Duration::from_millis(1000)]
    );

    tokio::time::advance(Duration::from_millis(1000)).await;
    assert_eq!(limiter.wait(&k).await, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_counter_resets_after_quiet_period() {
    let limiter = limiter();
    let k = spec("k", 1000, 2);

    for _ in 0..3 {
        limiter.wait(&k).await;
    }
    tokio::time::advance(Duration::from_millis(1500)).await;

    assert_eq!(limiter.wait(&k).await, Duration::ZERO);
    assert_eq!(limiter.wait(&k).await, Duration::ZERO);
    assert_eq!(limiter.wait(&k).await, Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_keys_do_not_share_quota() {
    let limiter = limiter();

    assert_eq!(limiter.wait(&spec("a", 1000, 1)).await, Duration::ZERO);
    assert_eq!(limiter.wait(&spec("b", 1000, 1)).await, Duration::ZERO);
    assert_eq!(
        limiter.wait(&spec("a", 1000, 1)).await,
        Duration::from_millis(1000)
    );
}

#[tokio::test(start_paused = true)]
async fn test_acquire_serializes_same_key() {
    let limiter = limiter();
    let k = spec("k", 1000, 1);
    let start = Instant::now();

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let limiter = limiter.clone();
            let k = k.clone();
            tokio::spawn(async move {
                limiter.acquire(&k).await;
                start.elapsed()
            })
        })
        .collect();

    let mut finished = Vec::new();
    for task in tasks {
        finished.push(task.await.unwrap().as_millis());
    }
    finished.sort();
    assert_eq!(finished, vec![0, 1000, 2000]);
}

#[tokio::test(start_paused = true)]
async fn test_gate_paces_items_in_order() {
    let limiter = limiter();
    let start = Instant::now();

    let released: Vec<_> = gate(limiter, stream::iter(1..=5), spec("g", 1000, 2))
        .map(|item| (item, start.elapsed().as_millis()))
        .collect()
        .await;

    assert_eq!(
        released,
        vec![(1, 0), (2, 0), (3, 1000), (4, 1000), (5, 2000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_queues_are_swept() {
    let limiter = limiter();
    limiter.acquire(&spec("quiet", 1000, 5)).await;
    limiter.acquire(&spec("busy", 1000, 5)).await;
    assert_eq!(limiter.tracked_keys(), vec!["busy", "quiet"]);

    tokio::time::advance(Duration::from_secs(3)).await;
    limiter.acquire(&spec("busy", 1000, 5)).await;

    let dropped = limiter.sweep(|_, idle| idle >= Duration::from_secs(2));
    assert_eq!(dropped, 1);
    assert_eq!(limiter.tracked_keys(), vec!["busy"]);

    assert!(limiter.forget("busy"));
    assert!(!limiter.forget("busy"));
}

struct BrokenStore;

#[async_trait]
impl CounterStore for BrokenStore {
    async fn increment_counter(
        &self,
        key: &str,
        _window: Duration,
        _limit: u32,
    ) -> StoreResult<CounterTick> {
        Err(StoreError::Conflict {
            key: key.to_string(),
            attempts: 16,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_store_fault_means_no_delay() {
    let limiter = RateLimiter::new(Arc::new(BrokenStore));
    let k = spec("k", 1000, 1);

    for _ in 0..5 {
        assert_eq!(limiter.wait(&k).await, Duration::ZERO);
    }
    assert_eq!(limiter.acquire(&k).await, Duration::ZERO);
}
