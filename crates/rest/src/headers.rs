use reqwest::header::HeaderMap;
use serde::Deserialize;
use shardline_core::BucketDetails;
use std::time::Duration;

/// Rate-limit information carried by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub bucket: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub retry_after: Option<Duration>,
    /// The 429 applies to every route, not one bucket
    pub global: bool,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            bucket: header_str(headers, "x-ratelimit-bucket").map(str::to_string),
            limit: header_str(headers, "x-ratelimit-limit").and_then(|v| v.parse().ok()),
            remaining: header_str(headers, "x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset_after: header_str(headers, "x-ratelimit-reset-after").and_then(parse_seconds),
            retry_after: header_str(headers, "retry-after").and_then(parse_seconds),
            global: header_str(headers, "x-ratelimit-global")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }

    /// Fill in what a 429 body carries when the headers did not
    pub fn merge_body(&mut self, body: &str) {
        #[derive(Deserialize)]
        struct RateLimitedBody {
            retry_after: Option<f64>,
            #[serde(default)]
            global: bool,
        }

        if let Ok(parsed) = serde_json::from_str::<RateLimitedBody>(body) {
            if self.retry_after.is_none() {
                self.retry_after = parsed.retry_after.and_then(seconds);
            }
            self.global |= parsed.global;
        }
    }

    /// The bucket these headers describe, when all parts are present
    pub fn bucket_details(&self) -> Option<BucketDetails> {
        Some(BucketDetails::new(
            self.bucket.clone()?,
            self.reset_after?,
            self.limit?,
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value.parse::<f64>().ok().and_then(seconds)
}

/// Longest reset or retry-after taken from a response
pub(crate) const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

fn seconds(value: f64) -> Option<Duration> {
    if value.is_finite() && value > MAX_RATE_LIMIT_WAIT.as_secs_f64() {
        return Some(MAX_RATE_LIMIT_WAIT);
    }
    Duration::try_from_secs_f64(value).ok()
}
