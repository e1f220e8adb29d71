use futures_util::{Stream, StreamExt};
use shardline_core::RateWindowSpec;

use crate::limiter::RateLimiter;

/// Pace a stream through `limiter`.
///
/// Each item is yielded only after its own slot on `spec.key` is due. Items
/// keep their order and delays accumulate serially, since every item takes a
/// slot before the next one is pulled.
pub fn gate<S>(limiter: RateLimiter, stream: S, spec: RateWindowSpec) -> impl Stream<Item = S::Item> + Send
where
    S: Stream + Send,
    S::Item: Send,
{
    stream.then(move |item| {
        let limiter = limiter.clone();
        let spec = spec.clone();
        async move {
            limiter.acquire(&spec).await;
            item
        }
    })
}
