use dashmap::DashMap;
use parking_lot::Mutex;
use shardline_core::{BucketDetails, RateWindowSpec};
use shardline_ports::BucketStore;
use shardline_ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RestConfig;
use crate::headers::RateLimitHeaders;

const GLOBAL_KEY: &str = "global";

/// Minimum spacing between two idle sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Learns the remote service's buckets from responses and paces requests by
/// them.
///
/// Until a route's first response arrives it is paced by the global limiter
/// only. Per-bucket limiter queues are dropped after `2 × reset_after`
/// without traffic; the global queue is never dropped.
pub struct BucketTracker {
    store: Arc<dyn BucketStore>,
    limiter: RateLimiter,
    global: RateWindowSpec,
    /// Idle timeout per bucket that currently has a limiter queue
    lanes: DashMap<String, Duration>,
    last_sweep: Mutex<Instant>,
}

impl BucketTracker {
    pub fn new(store: Arc<dyn BucketStore>, limiter: RateLimiter, config: &RestConfig) -> Self {
        Self {
            store,
            limiter,
            global: RateWindowSpec::new(GLOBAL_KEY, config.global_window, config.global_limit),
            lanes: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Suspend until `route` may be requested. Returns the total time waited.
    pub async fn before_request(&self, route: &str) -> Duration {
        self.sweep_if_due();

        let mut waited = self.limiter.acquire(&self.global).await;

        let details = match self.store.get_bucket_for_route(route).await {
            Ok(details) => details,
            Err(e) => {
                warn!(route, error = %e, "Bucket lookup failed, pacing globally only");
                None
            }
        };
        if let Some(details) = details {
            self.lanes
                .insert(details.bucket.clone(), details.idle_after());
            let spec = RateWindowSpec::new(details.bucket.clone(), details.window(), details.limit);
            waited += self.limiter.acquire(&spec).await;
        }
        waited
    }

    /// Pace a retry after a 429. The retry already waited out the bucket's
    /// `retry_after`, so only the global limiter applies.
    pub async fn before_retry(&self) -> Duration {
        self.limiter.acquire(&self.global).await
    }

    /// Record what a response revealed about `route`'s bucket
    pub async fn after_response(&self, route: &str, headers: &RateLimitHeaders) {
        let Some(details) = headers.bucket_details() else {
            return;
        };
        if let Err(e) = self.observe(route, &details, headers.remaining).await {
            warn!(route, bucket = %details.bucket, error = %e, "Failed to record bucket");
        }
    }

    async fn observe(
        &self,
        route: &str,
        details: &BucketDetails,
        remaining: Option<u32>,
    ) -> shardline_ports::StoreResult<()> {
        self.store.put_bucket_route(route, &details.bucket).await?;

        // First response of a fresh window
        let fresh_window = remaining == Some(details.limit.saturating_sub(1));
        if fresh_window || !self.store.has_bucket(&details.bucket).await? {
            debug!(
                route,
                bucket = %details.bucket,
                limit = details.limit,
                reset_after_ms = details.reset_after.as_millis() as u64,
                "Bucket updated"
            );
            self.store.put_bucket(details).await?;
        }
        Ok(())
    }

    fn sweep_if_due(&self) {
        {
            let mut last = self.last_sweep.lock();
            if last.elapsed() < SWEEP_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        self.sweep_idle();
    }

    /// Drop limiter queues of buckets idle for longer than `2 × reset_after`.
    /// Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let dropped = self.limiter.sweep(|key, idle| {
            key != GLOBAL_KEY && self.lanes.get(key).is_some_and(|ttl| idle >= *ttl)
        });
        let tracked = self.limiter.tracked_keys();
        self.lanes.retain(|bucket, _| tracked.contains(bucket));
        if dropped > 0 {
            debug!(dropped, "Swept idle bucket queues");
        }
        dropped
    }

    /// Buckets that currently hold a limiter queue
    pub fn active_buckets(&self) -> Vec<String> {
        let mut buckets: Vec<_> = self.lanes.iter().map(|e| e.key().clone()).collect();
        buckets.sort();
        buckets
    }
}
