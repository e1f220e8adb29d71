//! Shardline Core Domain
//!
//! Pure domain types shared by the rate limiter, the stores, the REST bucket
//! tracker, the gateway shards and the sharder.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Quotas
    BucketDetails,
    Counter,
    RateWindowSpec,
    // Claims
    ClaimIdContext,
    ShardClaim,
    SharderPresence,
    // Sessions
    SessionState,
};
pub use values::{ShardId, ShardIdentity, Timestamp, ceil_div_ms, duration_ms};
