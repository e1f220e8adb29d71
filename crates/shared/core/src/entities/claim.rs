use serde::{Deserialize, Serialize};

use crate::values::{ShardId, Timestamp};

/// Request for one more shard id, made by one sharder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimIdContext {
    /// Unique id of the requesting process
    pub sharder_id: String,
    /// Number of shard ids the requesting process already runs
    pub owned_count: u32,
    /// Total number of shards the deployment splits
    pub total_count: u32,
}

impl ClaimIdContext {
    pub fn new(sharder_id: impl Into<String>, owned_count: u32, total_count: u32) -> Self {
        Self {
            sharder_id: sharder_id.into(),
            owned_count,
            total_count,
        }
    }

    /// Fair share per process: `ceil(total / live)`
    pub fn fair_share(&self, live_sharders: u32) -> u32 {
        let live = live_sharders.max(1);
        self.total_count.div_ceil(live)
    }

    /// Whether this process may take one more id while `live_sharders`
    /// processes (itself included) compete for the shards
    pub fn may_claim(&self, live_sharders: u32) -> bool {
        self.owned_count < self.fair_share(live_sharders)
    }
}

/// Ownership record for one shard id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardClaim {
    pub shard_id: ShardId,
    pub sharder_id: String,
    pub claimed_at: Timestamp,
    pub refreshed_at: Timestamp,
    /// Last gateway round trip reported by the owning shard
    pub latency_ms: Option<u64>,
}

impl ShardClaim {
    pub fn new(shard_id: ShardId, sharder_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            shard_id,
            sharder_id: sharder_id.into(),
            claimed_at: now,
            refreshed_at: now,
            latency_ms: None,
        }
    }

    pub fn is_owned_by(&self, sharder_id: &str) -> bool {
        self.sharder_id == sharder_id
    }

    pub fn refreshed(mut self, now: Timestamp, latency_ms: Option<u64>) -> Self {
        self.refreshed_at = now;
        if latency_ms.is_some() {
            self.latency_ms = latency_ms;
        }
        self
    }
}

/// Liveness record for a sharder process, refreshed on every claim attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharderPresence {
    pub sharder_id: String,
    pub seen_at: Timestamp,
}
