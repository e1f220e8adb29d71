use std::time::Duration;

/// Connection and pacing settings for [`crate::RestClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    /// Base URL including the API version, without a trailing slash
    pub base_url: String,
    pub token: String,
    /// Budget shared by every request regardless of bucket
    pub global_limit: u32,
    pub global_window: Duration,
    /// Used when a 429 carries neither a header nor a body retry-after
    pub default_retry_after: Duration,
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_string(),
            token: String::new(),
            global_limit: 50,
            global_window: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
        }
    }
}

impl RestConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_global_limit(mut self, limit: u32, window: Duration) -> Self {
        self.global_limit = limit;
        self.global_window = window;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
