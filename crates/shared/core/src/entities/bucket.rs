use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A rate-limit bucket discovered from REST response headers.
///
/// One bucket may cover many routes; `bucket` is the opaque id the remote
/// service returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDetails {
    pub bucket: String,
    pub reset_after: Duration,
    pub limit: u32,
}

impl BucketDetails {
    pub fn new(bucket: impl Into<String>, reset_after: Duration, limit: u32) -> Self {
        Self {
            bucket: bucket.into(),
            reset_after,
            limit,
        }
    }

    /// Limiter window for this bucket: the advertised reset plus 10% slack
    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.reset_after.as_secs_f64() * 1.1).unwrap_or(Duration::MAX)
    }

    /// Inactivity after which the bucket's limiter queue may be dropped
    pub fn idle_after(&self) -> Duration {
        self.reset_after.saturating_mul(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_has_slack() {
        let details = BucketDetails::new("abc", Duration::from_secs(1), 5);
        assert_eq!(details.window(), Duration::from_millis(1100));
        assert_eq!(details.idle_after(), Duration::from_secs(2));
    }

    #[test]
    fn test_huge_reset_saturates() {
        let details = BucketDetails::new("abc", Duration::MAX, 5);
        assert_eq!(details.window(), Duration::MAX);
        assert_eq!(details.idle_after(), Duration::MAX);
    }
}
