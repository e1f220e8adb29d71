use std::time::Duration;
use tokio::time::Instant;

/// What to do when a heartbeat is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Send,
    /// The previous beat was never acknowledged
    Zombie,
}

/// Outstanding-acknowledgement counter for one connection
///
/// Each beat counts up, each ack counts down (never below zero). A beat that
/// would leave more than one ack outstanding means the connection is dead.
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    diff: i64,
    sent_at: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over for a new handshake. The last latency is kept.
    pub fn reset(&mut self) {
        self.diff = 0;
        self.sent_at = None;
    }

    pub fn on_beat_due(&mut self) -> Beat {
        self.diff += 1;
        if self.diff > 1 {
            return Beat::Zombie;
        }
        self.sent_at = Some(Instant::now());
        Beat::Send
    }

    pub fn on_ack(&mut self) {
        self.diff = (self.diff - 1).max(0);
        if let Some(sent_at) = self.sent_at.take() {
            self.latency = Some(sent_at.elapsed());
        }
    }

    pub fn diff(&self) -> i64 {
        self.diff
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// Delay before the first beat of a connection: a random fraction of the
/// interval, so shards started together do not beat together
pub fn first_beat_delay(interval: Duration) -> Duration {
    interval.mul_f64(rand::random::<f64>())
}
