use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shardline_core::{
    BucketDetails, ClaimIdContext, Counter, ShardClaim, ShardId, SharderPresence, Timestamp,
    ceil_div_ms, duration_ms,
};
use shardline_ports::{
    BucketStore, ClaimStore, Clock, CounterStore, CounterTick, StoreError, StoreResult,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use shardline_clock::SystemClock;

use super::{CasOutcome, KeyValueStore};
use crate::claims::{free_ids, live_sharders};
use crate::config::KvStoreConfig;

const CLAIM_PREFIX: &str = "claim:";
const PRESENCE_PREFIX: &str = "sharder:";

fn counter_key(key: &str) -> String {
    format!("counter:{key}")
}

fn bucket_key(bucket: &str) -> String {
    format!("bucket:{bucket}")
}

fn route_key(route: &str) -> String {
    format!("route:{route}")
}

fn claim_key(shard_id: ShardId) -> String {
    format!("{CLAIM_PREFIX}{shard_id}")
}

fn presence_key(sharder_id: &str) -> String {
    format!("{PRESENCE_PREFIX}{sharder_id}")
}

fn encode<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(format!("{key}: {e}")))
}

/// What a read-modify-write step decided
enum Mutation<T, R> {
    Write {
        value: T,
        ttl: Option<Duration>,
        result: R,
    },
    Keep(R),
}

/// Store ports over a shared key-value backend
///
/// Every multi-step update is a read followed by a versioned
/// compare-and-swap, retried a bounded number of times with jitter. Key
/// expiry is delegated to the backend's TTLs, so claims and presence records
/// of a dead process lapse on their own.
///
/// Key layout (values are JSON):
/// - `counter:{key}` → [`Counter`]
/// - `bucket:{id}` → [`BucketDetails`]
/// - `route:{route}` → bucket id
/// - `claim:{shard}` → [`ShardClaim`]
/// - `sharder:{id}` → [`SharderPresence`]
pub struct KvStore<K: KeyValueStore> {
    kv: Arc<K>,
    clock: Arc<dyn Clock>,
    config: KvStoreConfig,
}

impl<K: KeyValueStore> Clone for KvStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<K: KeyValueStore> KvStore<K> {
    pub fn new(kv: Arc<K>, clock: Arc<dyn Clock>, config: KvStoreConfig) -> Self {
        Self { kv, clock, config }
    }

    /// Store timed by the wall clock. Use this when several processes share
    /// `kv`, since they compare each other's claim and presence timestamps.
    pub fn with_system_clock(kv: Arc<K>, config: KvStoreConfig) -> Self {
        Self::new(kv, Arc::new(SystemClock::new()), config)
    }

    pub fn config(&self) -> &KvStoreConfig {
        &self.config
    }

    async fn modify<T, R, F>(&self, key: &str, mut apply: F) -> StoreResult<R>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnMut(Option<T>, Timestamp) -> Mutation<T, R> + Send,
    {
        let mut attempts = 0;
        loop {
            let current = self.kv.get(key).await?;
            let now = self.clock.now();
            let (version, decoded) = match current {
                Some(stored) => (Some(stored.version), Some(decode(key, &stored.value)?)),
                None => (None, None),
            };

            let (value, ttl, result) = match apply(decoded, now) {
                Mutation::Keep(result) => return Ok(result),
                Mutation::Write { value, ttl, result } => (encode(&value)?, ttl, result),
            };

            match self.kv.compare_and_swap(key, version, value, ttl).await? {
                CasOutcome::Swapped => return Ok(result),
                CasOutcome::Conflict => {
                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        warn!(key, attempts, "Giving up after repeated write conflicts");
                        return Err(StoreError::Conflict {
                            key: key.to_string(),
                            attempts,
                        });
                    }
                    debug!(key, attempts, "Write conflict, retrying");
                    self.pause().await;
                }
            }
        }
    }

    async fn put<T>(&self, key: &str, value: T, ttl: Duration) -> StoreResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send,
    {
        self.modify(key, move |_: Option<T>, _| Mutation::Write {
            value: value.clone(),
            ttl: Some(ttl),
            result: (),
        })
        .await
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.kv.get(key).await? {
            Some(stored) => Ok(Some(decode(key, &stored.value)?)),
            None => Ok(None),
        }
    }

    async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> StoreResult<Vec<T>> {
        let entries = self.kv.scan_prefix(prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, stored)| match decode(&key, &stored.value) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupt record");
                    None
                }
            })
            .collect())
    }

    async fn write_presence(&self, sharder_id: &str) -> StoreResult<()> {
        let presence = SharderPresence {
            sharder_id: sharder_id.to_string(),
            seen_at: self.clock.now(),
        };
        self.put(&presence_key(sharder_id), presence, self.config.ttl.presence_ttl)
            .await
    }

    async fn pause(&self) {
        let max_ms = duration_ms(self.config.retry_delay);
        if max_ms == 0 {
            tokio::task::yield_now().await;
            return;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }
}

#[async_trait]
impl<K: KeyValueStore> CounterStore for KvStore<K> {
    async fn increment_counter(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<CounterTick> {
        let per_request = ceil_div_ms(duration_ms(window), u64::from(limit));
        self.modify(&counter_key(key), |stored: Option<Counter>, now| {
            let mut counter = Counter::live(stored, now);
            let count = counter.increment(per_request);
            let ttl = counter.ttl(now);
            Mutation::Write {
                value: counter,
                ttl: Some(ttl),
                result: CounterTick { count, ttl },
            }
        })
        .await
    }
}

#[async_trait]
impl<K: KeyValueStore> BucketStore for KvStore<K> {
    async fn has_bucket(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.kv.get(&bucket_key(bucket)).await?.is_some())
    }

    async fn put_bucket(&self, details: &BucketDetails) -> StoreResult<()> {
        self.put(
            &bucket_key(&details.bucket),
            details.clone(),
            self.config.ttl.bucket_ttl,
        )
        .await
    }

    async fn get_bucket_for_route(&self, route: &str) -> StoreResult<Option<BucketDetails>> {
        let Some(bucket) = self.get::<String>(&route_key(route)).await? else {
            return Ok(None);
        };
        self.get(&bucket_key(&bucket)).await
    }

    async fn put_bucket_route(&self, route: &str, bucket: &str) -> StoreResult<()> {
        self.put(
            &route_key(route),
            bucket.to_string(),
            self.config.ttl.bucket_ttl,
        )
        .await
    }
}

#[async_trait]
impl<K: KeyValueStore> ClaimStore for KvStore<K> {
    async fn claim_id(&self, ctx: &ClaimIdContext) -> StoreResult<Option<ShardId>> {
        self.write_presence(&ctx.sharder_id).await?;

        let claims: Vec<ShardClaim> = self.scan(CLAIM_PREFIX).await?;
        let presences: Vec<SharderPresence> = self.scan(PRESENCE_PREFIX).await?;
        let live = live_sharders(&ctx.sharder_id, &claims, &presences);
        if !ctx.may_claim(live) {
            debug!(
                sharder_id = %ctx.sharder_id,
                owned = ctx.owned_count,
                live,
                "Fair share reached"
            );
            return Ok(None);
        }

        let claimed: HashSet<ShardId> = claims.iter().map(|c| c.shard_id).collect();
        for id in free_ids(&claimed, ctx.total_count) {
            let claim = ShardClaim::new(id, ctx.sharder_id.clone(), self.clock.now());
            let outcome = self
                .kv
                .compare_and_swap(
                    &claim_key(id),
                    None,
                    encode(&claim)?,
                    Some(self.config.ttl.claim_ttl),
                )
                .await?;
            match outcome {
                CasOutcome::Swapped => {
                    info!(sharder_id = %ctx.sharder_id, shard_id = id, "Claimed shard");
                    return Ok(Some(id));
                }
                // Taken between the scan and the write
                CasOutcome::Conflict => continue,
            }
        }
        Ok(None)
    }

    async fn heartbeat(
        &self,
        sharder_id: &str,
        shard_id: ShardId,
        latency: Option<Duration>,
    ) -> StoreResult<bool> {
        let claim_ttl = self.config.ttl.claim_ttl;
        let latency_ms = latency.map(duration_ms);
        let owned = self
            .modify(&claim_key(shard_id), |stored: Option<ShardClaim>, now| {
                match stored {
                    Some(claim) if claim.is_owned_by(sharder_id) => Mutation::Write {
                        value: claim.refreshed(now, latency_ms),
                        ttl: Some(claim_ttl),
                        result: true,
                    },
                    _ => Mutation::Keep(false),
                }
            })
            .await?;

        if owned {
            self.write_presence(sharder_id).await?;
        }
        Ok(owned)
    }

    async fn release(&self, sharder_id: &str, shard_id: ShardId) -> StoreResult<()> {
        let key = claim_key(shard_id);
        let mut attempts = 0;
        loop {
            let Some(stored) = self.kv.get(&key).await? else {
                return Ok(());
            };
            let claim: ShardClaim = decode(&key, &stored.value)?;
            if !claim.is_owned_by(sharder_id) {
                return Ok(());
            }
            match self.kv.delete(&key, stored.version).await? {
                CasOutcome::Swapped => {
                    info!(sharder_id, shard_id, "Released shard");
                    return Ok(());
                }
                CasOutcome::Conflict => {
                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        return Err(StoreError::Conflict { key, attempts });
                    }
                    self.pause().await;
                }
            }
        }
    }

    async fn touch_presence(&self, sharder_id: &str) -> StoreResult<()> {
        self.write_presence(sharder_id).await
    }

    async fn all_claimed(&self, total: u32) -> StoreResult<bool> {
        let claims: Vec<ShardClaim> = self.scan(CLAIM_PREFIX).await?;
        let claimed: HashSet<ShardId> = claims.iter().map(|c| c.shard_id).collect();
        Ok(free_ids(&claimed, total).next().is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKeyValueStore;
    use shardline_clock::ManualClock;

    fn store() -> (KvStore<InMemoryKeyValueStore>, Arc<InMemoryKeyValueStore>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(None));
        let kv = Arc::new(InMemoryKeyValueStore::new(Arc::clone(&clock)));
        (
            KvStore::new(Arc::clone(&kv), clock, KvStoreConfig::default()),
            kv,
        )
    }

    #[tokio::test]
    async fn test_counter_matches_in_memory_semantics() {
        let (store, _) = store();
        let window = Duration::from_millis(1000);

        let ticks: Vec<_> = [
            store.increment_counter("k", window, 2).await.unwrap(),
            store.increment_counter("k", window, 2).await.unwrap(),
            store.increment_counter("k", window, 2).await.unwrap(),
        ]
        .into_iter()
        .map(|t| (t.count, t.ttl.as_millis()))
        .collect();

        assert_eq!(ticks, vec![(1, 500), (2, 1000), (3, 1500)]);
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_reported() {
        let (store, kv) = store();
        kv.compare_and_swap("counter:k", None, "not json".into(), None)
            .await
            .unwrap();

        let err = store
            .increment_counter("k", Duration::from_secs(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let (store, kv) = store();
        let id = store
            .claim_id(&ClaimIdContext::new("a", 0, 1))
            .await
            .unwrap()
            .unwrap();

        store.release("b", id).await.unwrap();
        assert!(store.all_claimed(1).await.unwrap());

        store.release("a", id).await.unwrap();
        assert!(!store.all_claimed(1).await.unwrap());
        assert!(kv.get("claim:0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_buckets_round_trip_through_routes() {
        let (store, _) = store();
        let details = BucketDetails::new("abc", Duration::from_millis(2500), 5);

        store.put_bucket(&details).await.unwrap();
        store.put_bucket_route("GET /channels/1/messages", "abc").await.unwrap();

        assert!(store.has_bucket("abc").await.unwrap());
        assert!(!store.has_bucket("zzz").await.unwrap());
        assert_eq!(
            store
                .get_bucket_for_route("GET /channels/1/messages")
                .await
                .unwrap(),
            Some(details)
        );
    }

    #[tokio::test]
    async fn test_touched_presence_outlives_claim_backoff() {
        let clock = ManualClock::new(None);
        let kv = Arc::new(InMemoryKeyValueStore::new(Arc::new(clock.clone())));
        let store = KvStore::new(kv, Arc::new(clock.clone()), KvStoreConfig::default());
        assert_eq!(store.claim_id(&ClaimIdContext::new("a", 0, 2)).await.unwrap(), Some(0));
        assert_eq!(store.claim_id(&ClaimIdContext::new("a", 1, 2)).await.unwrap(), Some(1));
        assert_eq!(store.claim_id(&ClaimIdContext::new("c", 0, 2)).await.unwrap(), None);

        clock.advance(Duration::from_secs(50));
        store.touch_presence("c").await.unwrap();
        assert!(store.heartbeat("a", 0, None).await.unwrap());

        clock.advance(Duration::from_secs(50));
        store.release("a", 1).await.unwrap();
        assert_eq!(store.claim_id(&ClaimIdContext::new("a", 1, 2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_system_clock_stamps_wall_time() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(None));
        let kv = Arc::new(InMemoryKeyValueStore::new(clock));
        let store = KvStore::with_system_clock(Arc::clone(&kv), KvStoreConfig::default());

        let before = chrono::Utc::now();
        store.touch_presence("a").await.unwrap();
        let after = chrono::Utc::now();

        let stored = kv.get("sharder:a").await.unwrap().unwrap();
        let presence: SharderPresence = serde_json::from_str(&stored.value).unwrap();
        assert!(presence.seen_at >= before && presence.seen_at <= after);
    }
}
