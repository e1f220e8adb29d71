//! Shardline Gateway
//!
//! One [`Shard`] per gateway connection. A shard runs as its own task:
//!
//! ```text
//!   Connecting ──► AwaitingHello ──► Identifying ─┐
//!       ▲                    │                     ├─► Connected
//!       │                    └─────► Resuming ─────┘       │
//!       │                                                  │ missed ack / reconnect /
//!       └──────────────────── Reconnecting ◄───────────────┘ invalid session / close
//!
//!   close() from any state ──► Closed
//! ```
//!
//! ## Transport
//!
//! [`Transport`] opens one bidirectional text-frame stream per connection.
//! [`WsTransport`] speaks WebSocket; [`ChannelTransport`] connects to an
//! in-process server driven by tests.

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod identify;
pub mod protocol;
pub mod shard;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use command::GatewayCommand;
pub use config::{ConnectionProperties, ShardConfig};
pub use error::{GatewayError, TransportError};
pub use events::{EventKind, ShardEvent};
pub use heartbeat::{Beat, HeartbeatMonitor};
pub use identify::{IdentifyGate, Ungated};
pub use shard::{Shard, ShardDeps, ShardHandle};
pub use state::{ShardState, ShardStatus};
pub use transport::{
    Connection, Transport, TransportEvent, TransportMessage,
    channel::{ChannelServer, ChannelTransport, ServerConnection},
    ws::WsTransport,
};
