//! Shardline Clock Infrastructure
//!
//! Time sources for the stores:
//!
//! - [`SystemClock`]: wall-clock time, for stores shared between processes
//! - [`MonotonicClock`]: wall time anchored once, then advanced by tokio's
//!   instant, so paused-time tests see counters and claims expire
//! - [`ManualClock`]: only moves when told to
//!
//! ## Usage
//!
//! ```ignore
//! use shardline_clock::ManualClock;
//! use std::time::Duration;
//!
//! let clock = ManualClock::new(None);
//! let before = clock.now();
//! clock.advance(Duration::from_secs(90));
//! assert!(clock.now() > before);
//! ```

mod manual;
mod monotonic;
mod system;

pub use manual::ManualClock;
pub use monotonic::MonotonicClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use shardline_ports::Clock;
