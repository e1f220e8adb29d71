use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use shardline_clock::MonotonicClock;
use shardline_core::{
    BucketDetails, ClaimIdContext, Counter, ShardClaim, ShardId, SharderPresence, Timestamp,
    ceil_div_ms, duration_ms,
};
use shardline_ports::{BucketStore, ClaimStore, Clock, CounterStore, CounterTick, StoreResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::claims::{claim_is_live, expiry, free_ids, live_sharders, presence_is_live};
use crate::config::StoreConfig;

/// Counters are swept once the map grows past this many entries
const COUNTER_SWEEP_THRESHOLD: usize = 4096;

#[derive(Default)]
struct ClaimTable {
    claims: HashMap<ShardId, ShardClaim>,
    presences: HashMap<String, SharderPresence>,
}

impl ClaimTable {
    fn prune(&mut self, now: Timestamp, config: &StoreConfig) {
        self.claims
            .retain(|_, claim| claim_is_live(claim, now, config.claim_ttl));
        self.presences
            .retain(|_, presence| presence_is_live(presence, now, config.presence_ttl));
    }
}

/// In-memory store
///
/// Thread-safe storage for counters, buckets and claims. Suitable for a
/// single process; several sharders in one process may share a clone.
pub struct InMemoryStore {
    counters: Arc<DashMap<String, Counter>>,
    /// Bucket details with the time they were last written
    buckets: Arc<DashMap<String, (BucketDetails, Timestamp)>>,
    routes: Arc<DashMap<String, (String, Timestamp)>>,
    claims: Arc<Mutex<ClaimTable>>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()), StoreConfig::default())
    }

    pub fn with_clock(clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            buckets: Arc::new(DashMap::new()),
            routes: Arc::new(DashMap::new()),
            claims: Arc::new(Mutex::new(ClaimTable::default())),
            clock,
            config,
        }
    }

    /// Drop counters whose window has fully elapsed
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.counters.retain(|_, counter| !counter.is_expired(now));
    }

    fn bucket_is_live(&self, written_at: Timestamp, now: Timestamp) -> bool {
        now < expiry(written_at, self.config.bucket_ttl)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryStore {
    fn clone(&self) -> Self {
        Self {
            counters: Arc::clone(&self.counters),
            buckets: Arc::clone(&self.buckets),
            routes: Arc::clone(&self.routes),
            claims: Arc::clone(&self.claims),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment_counter(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<CounterTick> {
        let now = self.clock.now();
        let per_request = ceil_div_ms(duration_ms(window), u64::from(limit));

        let tick = {
            let mut entry = self
                .counters
                .entry(key.to_string())
                .or_insert_with(|| Counter::fresh(now));
            let counter = entry.value_mut();
            if counter.is_expired(now) {
                *counter = Counter::fresh(now);
            }
            let count = counter.increment(per_request);
            CounterTick {
                count,
                ttl: counter.ttl(now),
            }
        };

        if self.counters.len() > COUNTER_SWEEP_THRESHOLD {
            self.purge_expired();
        }
        Ok(tick)
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    async fn has_bucket(&self, bucket: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .buckets
            .get(bucket)
            .is_some_and(|entry| self.bucket_is_live(entry.value().1, now)))
    }

    async fn put_bucket(&self, details: &BucketDetails) -> StoreResult<()> {
        let now = self.clock.now();
        self.buckets
            .insert(details.bucket.clone(), (details.clone(), now));
        Ok(())
    }

    async fn get_bucket_for_route(&self, route: &str) -> StoreResult<Option<BucketDetails>> {
        let now = self.clock.now();
        let Some(bucket) = self
            .routes
            .get(route)
            .filter(|entry| self.bucket_is_live(entry.value().1, now))
            .map(|entry| entry.value().0.clone())
        else {
            return Ok(None);
        };

        Ok(self
            .buckets
            .get(&bucket)
            .filter(|entry| self.bucket_is_live(entry.value().1, now))
            .map(|entry| entry.value().0.clone()))
    }

    async fn put_bucket_route(&self, route: &str, bucket: &str) -> StoreResult<()> {
        let now = self.clock.now();
        self.routes
            .insert(route.to_string(), (bucket.to_string(), now));
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for InMemoryStore {
    async fn claim_id(&self, ctx: &ClaimIdContext) -> StoreResult<Option<ShardId>> {
        let now = self.clock.now();
        let mut table = self.claims.lock();
        table.prune(now, &self.config);
        table.presences.insert(
            ctx.sharder_id.clone(),
            SharderPresence {
                sharder_id: ctx.sharder_id.clone(),
                seen_at: now,
            },
        );

        let live = live_sharders(
            &ctx.sharder_id,
            table.claims.values(),
            table.presences.values(),
        );
        if !ctx.may_claim(live) {
            debug!(
                sharder_id = %ctx.sharder_id,
                owned = ctx.owned_count,
                live,
                "Fair share reached"
            );
            return Ok(None);
        }

        let claimed: HashSet<ShardId> = table.claims.keys().copied().collect();
        let Some(id) = free_ids(&claimed, ctx.total_count).next() else {
            return Ok(None);
        };
        table
            .claims
            .insert(id, ShardClaim::new(id, ctx.sharder_id.clone(), now));
        Ok(Some(id))
    }

    async fn heartbeat(
        &self,
        sharder_id: &str,
        shard_id: ShardId,
        latency: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut table = self.claims.lock();
        table.prune(now, &self.config);

        let Some(claim) = table
            .claims
            .get_mut(&shard_id)
            .filter(|claim| claim.is_owned_by(sharder_id))
        else {
            return Ok(false);
        };
        *claim = claim.clone().refreshed(now, latency.map(duration_ms));

        if let Some(presence) = table.presences.get_mut(sharder_id) {
            presence.seen_at = now;
        }
        Ok(true)
    }

    async fn release(&self, sharder_id: &str, shard_id: ShardId) -> StoreResult<()> {
        let mut table = self.claims.lock();
        if table
            .claims
            .get(&shard_id)
            .is_some_and(|claim| claim.is_owned_by(sharder_id))
        {
            table.claims.remove(&shard_id);
        }
        Ok(())
    }

    async fn touch_presence(&self, sharder_id: &str) -> StoreResult<()> {
        let now = self.clock.now();
        let mut table = self.claims.lock();
        table.prune(now, &self.config);
        table.presences.insert(
            sharder_id.to_string(),
            SharderPresence {
                sharder_id: sharder_id.to_string(),
                seen_at: now,
            },
        );
        Ok(())
    }

    async fn all_claimed(&self, total: u32) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut table = self.claims.lock();
        table.prune(now, &self.config);
        Ok((0..total).all(|id| table.claims.contains_key(&id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_clock::ManualClock;

    fn store_with_clock() -> (InMemoryStore, ManualClock) {
        let clock = ManualClock::new(None);
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()), StoreConfig::default());
        (store, clock)
    }

    #[tokio::test]
    async fn test_counter_increments_and_stretches() {
        let (store, _clock) = store_with_clock();
        let window = Duration::from_millis(1000);

        let first = store.increment_counter("k", window, 2).await.unwrap();
        let second = store.increment_counter("k", window, 2).await.unwrap();
        let third = store.increment_counter("k", window, 2).await.unwrap();

        assert_eq!((first.count, first.ttl), (1, Duration::from_millis(500)));
        assert_eq!((second.count, second.ttl), (2, Duration::from_millis(1000)));
        assert_eq!((third.count, third.ttl), (3, Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn test_counter_resets_after_expiry() {
        let (store, clock) = store_with_clock();
        let window = Duration::from_millis(1000);

        store.increment_counter("k", window, 2).await.unwrap();
        clock.advance(Duration::from_millis(500));

        let tick = store.increment_counter("k", window, 2).await.unwrap();
        assert_eq!(tick.count, 1);

        store.purge_expired();
        assert_eq!(store.counters.len(), 1);
        clock.advance(Duration::from_millis(500));
        store.purge_expired();
        assert!(store.counters.is_empty());
    }

    #[tokio::test]
    async fn test_route_resolves_through_bucket() {
        let (store, clock) = store_with_clock();
        let details = BucketDetails::new("abc", Duration::from_secs(1), 5);

        assert!(store.get_bucket_for_route("GET /x").await.unwrap().is_none());
        store.put_bucket_route("GET /x", "abc").await.unwrap();
        assert!(store.get_bucket_for_route("GET /x").await.unwrap().is_none());

        store.put_bucket(&details).await.unwrap();
        assert!(store.has_bucket("abc").await.unwrap());
        assert_eq!(
            store.get_bucket_for_route("GET /x").await.unwrap(),
            Some(details)
        );

        clock.advance(Duration::from_secs(3600));
        assert!(!store.has_bucket("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_claims_are_exclusive_and_released() {
        let (store, _clock) = store_with_clock();

        let a = store.claim_id(&ClaimIdContext::new("a", 0, 2)).await.unwrap();
        let b = store.claim_id(&ClaimIdContext::new("b", 0, 2)).await.unwrap();
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(1));
        assert!(store.all_claimed(2).await.unwrap());

        // Only the owner may release
        store.release("b", 0).await.unwrap();
        assert!(store.all_claimed(2).await.unwrap());
        store.release("a", 0).await.unwrap();
        assert!(!store.all_claimed(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_claim_alive() {
        let (store, clock) = store_with_clock();
        let id = store
            .claim_id(&ClaimIdContext::new("a", 0, 1))
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(
            store
                .heartbeat("a", id, Some(Duration::from_millis(42)))
                .await
                .unwrap()
        );
        assert!(!store.heartbeat("b", id, None).await.unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(store.all_claimed(1).await.unwrap());
        assert_eq!(
            store.claims.lock().claims.get(&id).and_then(|c| c.latency_ms),
            Some(42)
        );

        clock.advance(Duration::from_secs(30));
        assert!(!store.all_claimed(1).await.unwrap());
        assert!(!store.heartbeat("a", id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_touched_presence_holds_fair_share() {
        let (store, clock) = store_with_clock();
        assert_eq!(store.claim_id(&ClaimIdContext::new("a", 0, 2)).await.unwrap(), Some(0));
        assert_eq!(store.claim_id(&ClaimIdContext::new("a", 1, 2)).await.unwrap(), Some(1));
        assert_eq!(store.claim_id(&ClaimIdContext::new("c", 0, 2)).await.unwrap(), None);

        clock.advance(Duration::from_secs(50));
        store.touch_presence("c").await.unwrap();
        assert!(store.heartbeat("a", 0, None).await.unwrap());
        assert!(store.heartbeat("a", 1, None).await.unwrap());

        clock.advance(Duration::from_secs(50));
        store.release("a", 1).await.unwrap();
        assert_eq!(store.claim_id(&ClaimIdContext::new("a", 1, 2)).await.unwrap(), None);
        assert_eq!(store.claim_id(&ClaimIdContext::new("c", 0, 2)).await.unwrap(), Some(1));
    }
}
