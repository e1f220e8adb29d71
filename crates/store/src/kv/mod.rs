//! Key-value backend with optimistic concurrency.
//!
//! [`KeyValueStore`] is the narrow contract a shared backend must provide:
//! versioned reads, compare-and-swap writes with an optional TTL, conditional
//! deletes and prefix scans. [`KvStore`] builds every store port on top of it.

mod memory;
mod store;

use async_trait::async_trait;
use shardline_ports::StoreError;
use std::time::Duration;
use thiserror::Error;

pub use memory::InMemoryKeyValueStore;
pub use store::KvStore;

/// Errors raised by a key-value backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),
}

pub type KvResult<T> = std::result::Result<T, KvError>;

impl From<KvError> for StoreError {
    fn from(err: KvError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A stored value with the version its last write produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: String,
    pub version: u64,
}

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The key's version no longer matched the expectation
    Conflict,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a live (non-expired) value
    async fn get(&self, key: &str) -> KvResult<Option<VersionedValue>>;

    /// Write `value` only if the key is at `expected_version`, or absent when
    /// `expected_version` is `None`. A `ttl` makes the key expire on its own.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> KvResult<CasOutcome>;

    /// Delete the key only if it is still at `expected_version`
    async fn delete(&self, key: &str, expected_version: u64) -> KvResult<CasOutcome>;

    /// All live entries whose key starts with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<(String, VersionedValue)>>;
}
