//! Error types for the gateway crate

use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Gateway-level errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Shard is closed")]
    Closed,
}
