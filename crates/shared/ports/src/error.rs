use thiserror::Error;

/// Failures of a store round trip
///
/// Callers never treat these as fatal: the rate limiter assumes no extra delay
/// and the sharder assumes the claim failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Gave up on '{key}' after {attempts} conflicting writes")]
    Conflict { key: String, attempts: u32 },

    #[error("Corrupt store record: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
