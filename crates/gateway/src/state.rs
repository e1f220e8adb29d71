use serde::Serialize;
use shardline_core::{SessionState, ShardIdentity};
use std::fmt;
use std::time::Duration;

/// Lifecycle of one shard connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShardState {
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Connected,
    Reconnecting,
    /// Terminal; only reached through `ShardHandle::close`
    Closed,
}

impl ShardState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ShardState::Connected)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShardState::Connecting => "connecting",
            ShardState::AwaitingHello => "awaiting_hello",
            ShardState::Identifying => "identifying",
            ShardState::Resuming => "resuming",
            ShardState::Connected => "connected",
            ShardState::Reconnecting => "reconnecting",
            ShardState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observable snapshot of a shard
#[derive(Debug, Clone, PartialEq)]
pub struct ShardStatus {
    pub identity: ShardIdentity,
    pub state: ShardState,
    /// Last heartbeat round trip
    pub latency: Option<Duration>,
    pub session: Option<SessionState>,
}

impl ShardStatus {
    pub fn new(identity: ShardIdentity) -> Self {
        Self {
            identity,
            state: ShardState::Connecting,
            latency: None,
            session: None,
        }
    }
}
