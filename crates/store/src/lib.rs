//! Shardline Stores
//!
//! Backends for the counter, bucket and claim ports:
//!
//! - [`InMemoryStore`]: single-process default, guarded maps
//! - [`KvStore`]: any [`KeyValueStore`] with versioned compare-and-swap and
//!   TTLs, shared by cooperating processes
//! - [`InMemoryKeyValueStore`]: a [`KeyValueStore`] living in this process,
//!   used to run several sharders against one backend

mod claims;
mod config;
pub mod kv;
mod memory;

pub use config::{KvStoreConfig, StoreConfig};
pub use kv::{CasOutcome, InMemoryKeyValueStore, KeyValueStore, KvError, KvResult, KvStore, VersionedValue};
pub use memory::InMemoryStore;
