//! Shardline REST
//!
//! HTTP command surface of the remote API. Every request is normalized to a
//! route, paced by a global limiter and, once the route's bucket is known,
//! by that bucket's limiter. Buckets are learned from response headers.

mod capacity;
mod client;
mod config;
mod error;
mod headers;
mod route;
mod tracker;

pub use capacity::{CapacityProvider, GatewayCapacity, SessionStartLimit};
pub use client::RestClient;
pub use config::RestConfig;
pub use error::RestError;
pub use headers::RateLimitHeaders;
pub use route::normalize_route;
pub use tracker::BucketTracker;
