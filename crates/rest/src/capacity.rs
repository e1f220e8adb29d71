use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RestError;

/// Session start budget returned by the capacity query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    /// Handshakes that may run at the same time
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

/// Recommended sharding for this application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCapacity {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Source of the recommended shard count and handshake concurrency
#[async_trait]
pub trait CapacityProvider: Send + Sync {
    async fn gateway_capacity(&self) -> Result<GatewayCapacity, RestError>;
}
