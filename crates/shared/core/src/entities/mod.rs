mod bucket;
mod claim;
mod counter;
mod rate_window;
mod session;

pub use bucket::BucketDetails;
pub use claim::{ClaimIdContext, ShardClaim, SharderPresence};
pub use counter::Counter;
pub use rate_window::RateWindowSpec;
pub use session::SessionState;
