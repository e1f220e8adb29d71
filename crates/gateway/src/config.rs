use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Client properties sent with identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "shardline".to_string(),
            device: "shardline".to_string(),
        }
    }
}

/// Settings shared by every shard of a process
#[derive(Debug, Clone, PartialEq)]
pub struct ShardConfig {
    pub token: String,
    pub intents: u64,
    /// Base gateway URL; the version and encoding query are appended
    pub gateway_url: String,
    pub properties: ConnectionProperties,
    pub large_threshold: Option<u32>,
    /// Initial presence sent with identify
    pub presence: Option<Value>,
    /// Outbound command budget per connection
    pub command_limit: u32,
    pub command_window: Duration,
    /// First delay after a failed connection attempt, doubled up to the max
    pub reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
    /// How long a closing connection may take to acknowledge the close
    pub close_timeout: Duration,
    /// Queued `ShardHandle::send` commands per shard
    pub command_buffer: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: 0,
            gateway_url: "wss://gateway.discord.gg".to_string(),
            properties: ConnectionProperties::default(),
            large_threshold: None,
            presence: None,
            command_limit: 120,
            command_window: Duration::from_millis(60_500),
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(60),
            close_timeout: Duration::from_secs(1),
            command_buffer: 64,
        }
    }
}

impl ShardConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn with_presence(mut self, presence: Value) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_large_threshold(mut self, threshold: u32) -> Self {
        self.large_threshold = Some(threshold);
        self
    }

    pub fn with_command_limit(mut self, limit: u32, window: Duration) -> Self {
        self.command_limit = limit;
        self.command_window = window;
        self
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_backoff = initial;
        self.max_reconnect_backoff = max;
        self
    }
}
