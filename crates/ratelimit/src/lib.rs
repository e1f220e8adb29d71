//! Shardline Rate Limiter
//!
//! Turns a counter increment into a wait. Every accepted operation on a key
//! is scheduled onto a virtual timeline spaced `ceil(window / limit)` apart;
//! [`delay_from`] converts the slot an operation received back into how far
//! in the future that slot lies. The first `limit` operations of a fresh
//! window pass immediately, later ones are spread out instead of rejected.
//!
//! ## Usage
//!
//! ```ignore
//! use shardline_core::RateWindowSpec;
//! use shardline_ratelimit::RateLimiter;
//! use shardline_store::InMemoryStore;
//! use std::{sync::Arc, time::Duration};
//!
//! let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
//! let spec = RateWindowSpec::new("gateway:commands:0", Duration::from_millis(60_500), 120);
//! limiter.acquire(&spec).await; // suspends until the slot is due
//! ```

mod delay;
mod gate;
mod limiter;

pub use delay::delay_from;
pub use gate::gate;
pub use limiter::RateLimiter;
