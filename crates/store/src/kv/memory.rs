use async_trait::async_trait;
use parking_lot::Mutex;
use shardline_core::Timestamp;
use shardline_ports::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CasOutcome, KeyValueStore, KvResult, VersionedValue};
use crate::claims::expiry;

struct Entry {
    value: String,
    version: u64,
    expires_at: Option<Timestamp>,
}

impl Entry {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Versions are never reused, even across delete and re-create
    next_version: u64,
}

impl Inner {
    fn live(&mut self, key: &str, now: Timestamp) -> Option<&Entry> {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }
}

/// Key-value backend held in process memory
///
/// Behaves like a shared external store (versions, TTLs, conditional writes)
/// so several sharders can be pointed at clones of one instance.
#[derive(Clone)]
pub struct InMemoryKeyValueStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKeyValueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> KvResult<Option<VersionedValue>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        Ok(inner.live(key, now).map(|e| VersionedValue {
            value: e.value.clone(),
            version: e.version,
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> KvResult<CasOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let current = inner.live(key, now).map(|e| e.version);
        if current != expected_version {
            return Ok(CasOutcome::Conflict);
        }

        inner.next_version += 1;
        let version = inner.next_version;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: ttl.map(|ttl| expiry(now, ttl)),
            },
        );
        Ok(CasOutcome::Swapped)
    }

    async fn delete(&self, key: &str, expected_version: u64) -> KvResult<CasOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let matches = inner
            .live(key, now)
            .is_some_and(|e| e.version == expected_version);
        if !matches {
            return Ok(CasOutcome::Conflict);
        }
        inner.entries.remove(key);
        Ok(CasOutcome::Swapped)
    }

    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<(String, VersionedValue)>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.entries.retain(|_, e| e.is_live(now));
        let mut found: Vec<_> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, e)| {
                (
                    key.clone(),
                    VersionedValue {
                        value: e.value.clone(),
                        version: e.version,
                    },
                )
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_clock::ManualClock;

    fn kv() -> (InMemoryKeyValueStore, ManualClock) {
        let clock = ManualClock::new(None);
        (InMemoryKeyValueStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_cas_requires_matching_version() {
        let (kv, _clock) = kv();

        let created = kv.compare_and_swap("a", None, "1".into(), None).await.unwrap();
        assert_eq!(created, CasOutcome::Swapped);
        let again = kv.compare_and_swap("a", None, "2".into(), None).await.unwrap();
        assert_eq!(again, CasOutcome::Conflict);

        let current = kv.get("a").await.unwrap().unwrap();
        assert_eq!(current.value, "1");
        let stale = current.version + 1;
        assert_eq!(
            kv.compare_and_swap("a", Some(stale), "3".into(), None).await.unwrap(),
            CasOutcome::Conflict
        );
        assert_eq!(
            kv.compare_and_swap("a", Some(current.version), "3".into(), None)
                .await
                .unwrap(),
            CasOutcome::Swapped
        );
        assert_eq!(kv.get("a").await.unwrap().unwrap().value, "3");
    }

    #[tokio::test]
    async fn test_ttl_expires_keys() {
        let (kv, clock) = kv();
        kv.compare_and_swap("a", None, "1".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(kv.get("a").await.unwrap().is_some());
        clock.advance(Duration::from_secs(1));
        assert!(kv.get("a").await.unwrap().is_none());
        assert!(kv.is_empty());

        // An expired key counts as absent for creation
        assert_eq!(
            kv.compare_and_swap("a", None, "2".into(), None).await.unwrap(),
            CasOutcome::Swapped
        );
    }

    #[tokio::test]
    async fn test_delete_and_scan() {
        let (kv, _clock) = kv();
        kv.compare_and_swap("claim:1", None, "x".into(), None).await.unwrap();
        kv.compare_and_swap("claim:0", None, "y".into(), None).await.unwrap();
        kv.compare_and_swap("route:a", None, "z".into(), None).await.unwrap();

        let claims = kv.scan_prefix("claim:").await.unwrap();
        let keys: Vec<_> = claims.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["claim:0", "claim:1"]);

        let version = claims[0].1.version;
        assert_eq!(kv.delete("claim:0", version + 100).await.unwrap(), CasOutcome::Conflict);
        assert_eq!(kv.delete("claim:0", version).await.unwrap(), CasOutcome::Swapped);
        assert_eq!(kv.len(), 2);
    }
}
