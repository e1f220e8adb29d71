use async_trait::async_trait;
use shardline_core::{BucketDetails, ClaimIdContext, ShardId};
use std::time::Duration;

use crate::error::StoreResult;

/// Result of one atomic increment-and-extend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterTick {
    /// Post-increment count
    pub count: u64,
    /// Time left until the counter's stretched expiry
    pub ttl: Duration,
}

/// Port for the rate limiter's per-key counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read-or-initialize the counter for `key`, increment it and push its
    /// expiry back by `ceil(window / limit)`. Atomic per key.
    async fn increment_counter(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<CounterTick>;
}

/// Port for the REST bucket tracker's discovered buckets
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn has_bucket(&self, bucket: &str) -> StoreResult<bool>;

    async fn put_bucket(&self, details: &BucketDetails) -> StoreResult<()>;

    /// Resolve `route` to its bucket and return that bucket's details
    async fn get_bucket_for_route(&self, route: &str) -> StoreResult<Option<BucketDetails>>;

    async fn put_bucket_route(&self, route: &str, bucket: &str) -> StoreResult<()>;
}

/// Port for distributed shard ownership
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claim the lowest free shard id, or `None` when every id is taken or
    /// the caller already holds its fair share.
    async fn claim_id(&self, ctx: &ClaimIdContext) -> StoreResult<Option<ShardId>>;

    /// Refresh the claim's TTL. Returns `false` when the claim is no longer
    /// held by `sharder_id`.
    async fn heartbeat(
        &self,
        sharder_id: &str,
        shard_id: ShardId,
        latency: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Drop a claim held by `sharder_id`. Releasing a claim held by someone
    /// else is a no-op.
    async fn release(&self, sharder_id: &str, shard_id: ShardId) -> StoreResult<()>;

    /// Mark `sharder_id` as live without claiming anything. Processes
    /// waiting out a claim backoff call this so peers keep counting them.
    async fn touch_presence(&self, sharder_id: &str) -> StoreResult<()>;

    /// Whether every id in `[0, total)` currently has a live claim
    async fn all_claimed(&self, total: u32) -> StoreResult<bool>;
}

/// Everything a full backend provides
pub trait Store: CounterStore + BucketStore + ClaimStore {}

impl<T> Store for T where T: CounterStore + BucketStore + ClaimStore {}
