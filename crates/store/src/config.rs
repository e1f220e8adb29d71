use std::time::Duration;

/// TTLs shared by both store backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// A claim lapses when not refreshed for this long
    pub claim_ttl: Duration,
    /// A sharder stops counting toward the fair share after this long
    pub presence_ttl: Duration,
    /// Discovered buckets and route mappings are forgotten after this long
    pub bucket_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(90),
            presence_ttl: Duration::from_secs(90),
            bucket_ttl: Duration::from_secs(3600),
        }
    }
}

impl StoreConfig {
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn with_presence_ttl(mut self, ttl: Duration) -> Self {
        self.presence_ttl = ttl;
        self
    }

    pub fn with_bucket_ttl(mut self, ttl: Duration) -> Self {
        self.bucket_ttl = ttl;
        self
    }
}

/// Settings for [`crate::KvStore`]'s optimistic write loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvStoreConfig {
    pub ttl: StoreConfig,
    /// Conflicting writes tolerated before giving up with `StoreError::Conflict`
    pub max_retries: u32,
    /// Upper bound of the random pause between attempts
    pub retry_delay: Duration,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            ttl: StoreConfig::default(),
            max_retries: 16,
            retry_delay: Duration::from_millis(5),
        }
    }
}

impl KvStoreConfig {
    pub fn with_ttl(mut self, ttl: StoreConfig) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
