use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use shardline_core::Timestamp;
use shardline_ports::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Clock that only advances when explicitly moved
///
/// Cloning shares the underlying time, so a test can hand one clone to a
/// store and keep another to drive it.
#[derive(Clone)]
pub struct ManualClock {
    current: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    /// Create a manual clock. If `initial_time` is None, starts at the current wall time.
    pub fn new(initial_time: Option<Timestamp>) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial_time.unwrap_or_else(Utc::now))),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let Ok(step) = ChronoDuration::from_std(by) else {
            return;
        };
        let mut current = self.current.write();
        if let Some(next) = current.checked_add_signed(step) {
            *current = next;
        }
    }

    /// Jump to a specific time
    pub fn set(&self, to: Timestamp) {
        *self.current.write() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read()
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}
