use async_trait::async_trait;
use shardline_core::{RateWindowSpec, ShardIdentity};
use shardline_gateway::IdentifyGate;
use shardline_ratelimit::RateLimiter;
use std::time::Duration;
use tracing::debug;

/// Handshake pacing shared by every process using the same store
///
/// Shards fall into `max_concurrency` buckets by `id % max_concurrency`;
/// each bucket admits one identify or resume per window.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    limiter: RateLimiter,
    max_concurrency: u32,
    window: Duration,
}

impl ConcurrencyGate {
    pub fn new(limiter: RateLimiter, max_concurrency: u32, window: Duration) -> Self {
        Self {
            limiter,
            max_concurrency: max_concurrency.max(1),
            window,
        }
    }

    pub fn spec_for(&self, shard_id: u32) -> RateWindowSpec {
        RateWindowSpec::new(
            format!("identify:{}", shard_id % self.max_concurrency),
            self.window,
            1,
        )
    }
}

#[async_trait]
impl IdentifyGate for ConcurrencyGate {
    async fn wait_turn(&self, shard: ShardIdentity) {
        let spec = self.spec_for(shard.id);
        let waited = self.limiter.acquire(&spec).await;
        if !waited.is_zero() {
            debug!(shard_id = shard.id, bucket = %spec.key, waited_ms = waited.as_millis() as u64, "Handshake delayed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_store::InMemoryStore;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn gate(max_concurrency: u32) -> ConcurrencyGate {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
        ConcurrencyGate::new(limiter, max_concurrency, Duration::from_secs(5))
    }

    #[test]
    fn test_bucket_keys() {
        let gate = gate(16);
        assert_eq!(gate.spec_for(0).key, "identify:0");
        assert_eq!(gate.spec_for(17).key, "identify:1");
        assert_eq!(gate.spec_for(17).limit, 1);

        // Zero concurrency behaves like one
        assert_eq!(self::gate(0).spec_for(5).key, "identify:0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_bucket_waits_a_window() {
        let gate = gate(2);
        let start = Instant::now();

        gate.wait_turn(ShardIdentity::new(0, 4)).await;
        gate.wait_turn(ShardIdentity::new(1, 4)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        gate.wait_turn(ShardIdentity::new(2, 4)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        gate.wait_turn(ShardIdentity::new(3, 4)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
