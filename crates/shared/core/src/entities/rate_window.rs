use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::values::{ceil_div_ms, duration_ms};

/// One logical quota: at most `limit` operations per `window` on `key`.
///
/// Not persisted; derived per call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateWindowSpec {
    pub key: String,
    pub window: Duration,
    pub limit: u32,
}

impl RateWindowSpec {
    pub fn new(key: impl Into<String>, window: Duration, limit: u32) -> Self {
        Self {
            key: key.into(),
            window,
            limit,
        }
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> u64 {
        duration_ms(self.window)
    }

    /// Spacing between two scheduled slots: `ceil(window / limit)`
    pub fn per_request_ms(&self) -> u64 {
        ceil_div_ms(self.window_ms(), u64::from(self.limit))
    }
}
