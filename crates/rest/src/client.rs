use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shardline_ports::{BucketStore, CounterStore};
use shardline_ratelimit::RateLimiter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capacity::{CapacityProvider, GatewayCapacity};
use crate::config::RestConfig;
use crate::error::RestError;
use crate::headers::RateLimitHeaders;
use crate::route::normalize_route;
use crate::tracker::BucketTracker;

/// REST API client
///
/// Every call goes through the [`BucketTracker`]. A 429 is retried once,
/// after the server-provided delay, without re-entering the limiters.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    config: RestConfig,
    tracker: Arc<BucketTracker>,
}

impl RestClient {
    pub fn new<S>(config: RestConfig, store: Arc<S>) -> Result<Self, RestError>
    where
        S: CounterStore + BucketStore + 'static,
    {
        let counters: Arc<dyn CounterStore> = store.clone();
        let buckets: Arc<dyn BucketStore> = store;
        let tracker = BucketTracker::new(buckets, RateLimiter::new(counters), &config);
        Self::with_tracker(config, Arc::new(tracker))
    }

    pub fn with_tracker(config: RestConfig, tracker: Arc<BucketTracker>) -> Result<Self, RestError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(RestClient {
            client,
            config,
            tracker,
        })
    }

    pub fn tracker(&self) -> &Arc<BucketTracker> {
        &self.tracker
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RestError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RestError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        self.request::<T, ()>(Method::DELETE, path, None).await
    }

    /// Send one request, paced by its route's bucket
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let route = normalize_route(method.as_str(), path);
        self.tracker.before_request(&route).await;

        let resp = self.send(&method, path, body).await?;
        let (status, limits, text) = self.read(&route, resp).await?;
        if status != StatusCode::TOO_MANY_REQUESTS {
            return Self::decode(status, &text);
        }

        let retry_after = limits.retry_after.unwrap_or(self.config.default_retry_after);
        warn!(
            route = %route,
            global = limits.global,
            retry_after_ms = retry_after.as_millis() as u64,
            "Rate limited, retrying once"
        );
        tokio::time::sleep(retry_after).await;
        self.tracker.before_retry().await;

        let resp = self.send(&method, path, body).await?;
        let (status, limits, text) = self.read(&route, resp).await?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RestError::RateLimited {
                retry_after: limits.retry_after.unwrap_or(self.config.default_retry_after),
            });
        }
        Self::decode(status, &text)
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, RestError> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!(method = %method, url = %url, "REST request");
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Bot {}", self.config.token));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Consume a response, recording its rate-limit headers
    async fn read(
        &self,
        route: &str,
        resp: Response,
    ) -> Result<(StatusCode, RateLimitHeaders, String), RestError> {
        let status = resp.status();
        let mut limits = RateLimitHeaders::from_headers(resp.headers());
        let text = resp.text().await?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            limits.merge_body(&text);
        }
        self.tracker.after_response(route, &limits).await;
        Ok((status, limits, text))
    }

    fn decode<T: DeserializeOwned>(status: StatusCode, text: &str) -> Result<T, RestError> {
        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(text) {
                return Err(RestError::Api {
                    status: status.as_u16(),
                    code: err.code,
                    message: err.message,
                });
            }
            return Err(RestError::Parse(format!("HTTP {}: {}", status, text)));
        }

        // 204 No Content decodes as `()`
        let text = if text.trim().is_empty() { "null" } else { text };
        serde_json::from_str(text).map_err(|e| RestError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CapacityProvider for RestClient {
    async fn gateway_capacity(&self) -> Result<GatewayCapacity, RestError> {
        self.get("/gateway/bot").await
    }
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    message: String,
}
