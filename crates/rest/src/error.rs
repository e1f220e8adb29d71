use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {code}: {message}")]
    Api {
        status: u16,
        code: i64,
        message: String,
    },
    #[error("Still rate limited after retrying (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },
    #[error("Parse error: {0}")]
    Parse(String),
}
