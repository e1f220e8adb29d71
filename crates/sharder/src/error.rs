use shardline_ports::StoreError;
use shardline_rest::RestError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum SharderError {
    #[error("Shard count unknown: configure it or provide a capacity source")]
    MissingShardCount,
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),
    #[error("Capacity discovery failed: {0}")]
    Capacity(#[from] RestError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Shard {0} is not running in this process")]
    UnknownShard(u32),
    #[error("Gateway error: {0}")]
    Gateway(#[from] shardline_gateway::GatewayError),
}
