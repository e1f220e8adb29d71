use serde::{Deserialize, Serialize};
use shardline_gateway::ShardConfig;
use shardline_rest::RestConfig;
use std::time::Duration;

use crate::sharder::SharderConfig;

/// Root configuration for one sharder process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharderConfigFile {
    /// Bot token; `SHARDLINE_TOKEN` overrides it
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub rest: RestConfigJson,
    #[serde(default)]
    pub gateway: GatewayConfigJson,
    #[serde(default)]
    pub sharding: ShardingConfigJson,
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// REST side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfigJson {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_global_limit")]
    pub global_limit: u32,
    #[serde(default = "default_global_window")]
    pub global_window_ms: u64,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for RestConfigJson {
    fn default() -> Self {
        RestConfigJson {
            base_url: default_base_url(),
            global_limit: default_global_limit(),
            global_window_ms: default_global_window(),
            timeout_ms: default_timeout(),
        }
    }
}

/// Gateway connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigJson {
    /// Fixed gateway URL; discovered through the REST API when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub intents: u64,
    #[serde(default)]
    pub large_threshold: Option<u32>,
    #[serde(default = "default_command_limit")]
    pub command_limit: u32,
    #[serde(default = "default_command_window")]
    pub command_window_ms: u64,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_max_reconnect_backoff")]
    pub max_reconnect_backoff_ms: u64,
}

impl Default for GatewayConfigJson {
    fn default() -> Self {
        GatewayConfigJson {
            url: None,
            intents: 0,
            large_threshold: None,
            command_limit: default_command_limit(),
            command_window_ms: default_command_window(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            max_reconnect_backoff_ms: default_max_reconnect_backoff(),
        }
    }
}

/// Shard claiming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingConfigJson {
    /// Total shards; discovered when absent
    #[serde(default)]
    pub shard_count: Option<u32>,
    /// Identify concurrency; discovered when absent
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    #[serde(default = "default_identify_window")]
    pub identify_window_ms: u64,
    #[serde(default = "default_claim_backoff")]
    pub claim_backoff_ms: u64,
    #[serde(default = "default_claim_heartbeat")]
    pub claim_heartbeat_ms: u64,
    #[serde(default = "default_presence_refresh")]
    pub presence_refresh_ms: u64,
}

impl Default for ShardingConfigJson {
    fn default() -> Self {
        ShardingConfigJson {
            shard_count: None,
            max_concurrency: None,
            identify_window_ms: default_identify_window(),
            claim_backoff_ms: default_claim_backoff(),
            claim_heartbeat_ms: default_claim_heartbeat(),
            presence_refresh_ms: default_presence_refresh(),
        }
    }
}

impl SharderConfigFile {
    /// Runtime config for the REST client
    pub fn rest_config(&self) -> RestConfig {
        RestConfig::new(&self.token)
            .with_base_url(&self.rest.base_url)
            .with_global_limit(
                self.rest.global_limit,
                Duration::from_millis(self.rest.global_window_ms),
            )
            .with_timeout(Duration::from_millis(self.rest.timeout_ms))
    }

    /// Runtime config shared by every shard
    pub fn shard_config(&self) -> ShardConfig {
        let gateway = &self.gateway;
        let mut config = ShardConfig::new(&self.token)
            .with_intents(gateway.intents)
            .with_command_limit(
                gateway.command_limit,
                Duration::from_millis(gateway.command_window_ms),
            )
            .with_reconnect_backoff(
                Duration::from_millis(gateway.reconnect_backoff_ms),
                Duration::from_millis(gateway.max_reconnect_backoff_ms),
            );
        if let Some(url) = &gateway.url {
            config = config.with_gateway_url(url);
        }
        if let Some(threshold) = gateway.large_threshold {
            config = config.with_large_threshold(threshold);
        }
        config
    }

    /// Runtime config for the sharder itself
    pub fn sharder_config(&self) -> SharderConfig {
        let sharding = &self.sharding;
        SharderConfig {
            shard_count: sharding.shard_count,
            max_concurrency: sharding.max_concurrency,
            gateway_url: self.gateway.url.clone(),
            identify_window: Duration::from_millis(sharding.identify_window_ms),
            claim_backoff: Duration::from_millis(sharding.claim_backoff_ms),
            claim_heartbeat: Duration::from_millis(sharding.claim_heartbeat_ms),
            presence_refresh: Duration::from_millis(sharding.presence_refresh_ms),
            event_capacity: self.event_capacity,
        }
    }
}

fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_global_limit() -> u32 {
    50
}

fn default_global_window() -> u64 {
    1_000
}

fn default_timeout() -> u64 {
    15_000
}

fn default_command_limit() -> u32 {
    120
}

fn default_command_window() -> u64 {
    60_500
}

fn default_reconnect_backoff() -> u64 {
    1_000
}

fn default_max_reconnect_backoff() -> u64 {
    60_000
}

fn default_identify_window() -> u64 {
    5_000
}

fn default_claim_backoff() -> u64 {
    120_000
}

fn default_claim_heartbeat() -> u64 {
    60_000
}

fn default_presence_refresh() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    1_024
}
