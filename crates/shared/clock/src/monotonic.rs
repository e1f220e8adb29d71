use chrono::{Duration as ChronoDuration, Utc};
use shardline_core::Timestamp;
use shardline_ports::Clock;
use tokio::time::Instant;

/// Wall time anchored at construction and advanced by `tokio::time::Instant`
///
/// Never jumps backwards when the system clock is adjusted, and follows
/// tokio's paused clock inside `start_paused` tests.
pub struct MonotonicClock {
    wall_base: Timestamp,
    instant_base: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            wall_base: Utc::now(),
            instant_base: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.instant_base.elapsed();
        ChronoDuration::from_std(elapsed)
            .map(|elapsed| self.wall_base + elapsed)
            .unwrap_or(self.wall_base)
    }

    fn name(&self) -> &str {
        "MonotonicClock"
    }
}
