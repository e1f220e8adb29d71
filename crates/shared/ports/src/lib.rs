//! Shardline Ports
//!
//! Port definitions (traits) shared by the rate limiter, the REST bucket
//! tracker and the sharder. These define the boundaries between the
//! scheduling logic and whatever backend holds the shared state.

mod clock;
mod error;
mod store;

pub use clock::Clock;
pub use error::{StoreError, StoreResult};
pub use store::{BucketStore, ClaimStore, CounterStore, CounterTick, Store};
