use chrono::Utc;
use shardline_core::Timestamp;
use shardline_ports::Clock;

/// Real system clock for production use
///
/// Processes sharing a distributed store compare timestamps written by each
/// other, so they must all read wall-clock time.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_wall_time() {
        let clock = SystemClock::default();
        let before = Utc::now();
        let read = clock.now();

        assert!(read >= before && read <= Utc::now());
        assert_eq!(clock.name(), "SystemClock");
    }
}
