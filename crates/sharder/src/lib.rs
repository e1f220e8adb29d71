//! Shardline Sharder
//!
//! Splits a fixed number of gateway shards between cooperating processes.
//! Each process claims ids through a shared [`ClaimStore`], runs one
//! [`Shard`] per claimed id and refreshes its claims while they run:
//!
//! ```text
//!   claim_id ──► Some(id) ──► spawn shard ──► refresh claim every 60s
//!      ▲            │                               │
//!      │          None                        lost claim
//!      └── backoff ─┘                               └──► close shard
//! ```
//!
//! Handshakes pass a [`ConcurrencyGate`]: shards fall into
//! `max_concurrency` buckets, each admitting one identify per window.
//!
//! [`ClaimStore`]: shardline_ports::ClaimStore
//! [`Shard`]: shardline_gateway::Shard

pub mod config;
pub mod error;
pub mod gate;
pub mod sharder;

pub use config::{ConfigError, SharderConfigFile, load_config, load_config_from_str, load_default_config};
pub use error::SharderError;
pub use gate::ConcurrencyGate;
pub use sharder::{Sharder, SharderConfig, SharderHandle};
