use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::values::Timestamp;

/// Per-key scheduling counter.
///
/// `count` grows while the counter is live and `expires_at` is pushed one
/// slot (`ceil(window / limit)`) into the future on every increment. Once the
/// clock reaches `expires_at` the counter reads as `{ count: 0 }` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub count: u64,
    pub expires_at: Timestamp,
}

impl Counter {
    /// A counter with no scheduled slots
    pub fn fresh(now: Timestamp) -> Self {
        Self {
            count: 0,
            expires_at: now,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// The live view of a stored counter: expired counters restart from zero
    pub fn live(stored: Option<Counter>, now: Timestamp) -> Self {
        match stored {
            Some(counter) if !counter.is_expired(now) => counter,
            _ => Self::fresh(now),
        }
    }

    /// Increment and extend by one slot. Returns the post-increment count.
    pub fn increment(&mut self, per_request_ms: u64) -> u64 {
        self.count += 1;
        let step = i64::try_from(per_request_ms)
            .ok()
            .and_then(ChronoDuration::try_milliseconds);
        if let Some(next) = step.and_then(|step| self.expires_at.checked_add_signed(step)) {
            self.expires_at = next;
        }
        self.count
    }

    /// Time remaining until the stretched expiry
    pub fn ttl(&self, now: Timestamp) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}
