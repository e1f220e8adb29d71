use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Shard identifier, in `[0, shard_count)`
pub type ShardId = u32;

/// `[shard_id, shard_count]` pair sent in the identify payload.
///
/// Immutable for the lifetime of one shard connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardIdentity {
    pub id: ShardId,
    pub count: u32,
}

impl ShardIdentity {
    pub fn new(id: ShardId, count: u32) -> Self {
        Self { id, count }
    }

    /// Wire form used by the identify payload
    pub fn as_pair(&self) -> [u32; 2] {
        [self.id, self.count]
    }
}

impl fmt::Display for ShardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.id, self.count)
    }
}

/// Whole milliseconds in a duration, saturating at `u64::MAX`
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `ceil(numerator / denominator)` for millisecond arithmetic.
///
/// A zero denominator is treated as one.
pub fn ceil_div_ms(numerator: u64, denominator: u64) -> u64 {
    let denominator = denominator.max(1);
    numerator.div_ceil(denominator)
}
