//! In-memory store with Redis semantics

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{CappedCount, DistributedStore, StoreError, WindowSnapshot};
use crate::domain::clock::{Clock, SystemClock};

enum StoredValue {
    String(String),
    /// (score, member), kept sorted by score
    SortedSet(Vec<(i64, String)>),
}

/// Store entry with expiration
struct MemoryEntry {
    value: StoredValue,
    expires_at_ms: Option<i64>,
}

impl MemoryEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// Process-local store implementing the same operations as Dragonfly
///
/// Every operation runs under one write lock, so the pipelines are as atomic
/// as their Redis counterparts. `set_available(false)` simulates an outage:
/// every call then fails with [`StoreError::Unavailable`].
pub struct InMemoryStore {
    data: RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now_ms = self.clock.now_millis();
        let data = self.data.read().await;
        data.values().filter(|e| !e.is_expired(now_ms)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !candidate.starts_with(first) || candidate.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &candidate[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[async_trait]
impl DistributedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        let now_ms = self.clock.now_millis();
        let mut data = self.data.write().await;

        // Lazy expiry
        if data.get(key).is_some_and(|e| e.is_expired(now_ms)) {
            data.remove(key);
            return Ok(None);
        }

        match data.get(key).map(|e| &e.value) {
            Some(StoredValue::String(value)) => Ok(Some(value.clone())),
            Some(StoredValue::SortedSet(_)) => Err(StoreError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_available()?;
        let now_ms = self.clock.now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis().max(1)).unwrap_or(i64::MAX);
        self.data.write().await.insert(
            key.to_string(),
            MemoryEntry {
                value: StoredValue::String(value.to_string()),
                expires_at_ms: Some(now_ms.saturating_add(ttl_ms)),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        let now_ms = self.clock.now_millis();
        let data = self.data.read().await;
        Ok(data
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now_ms) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.ensure_available()?;
        let now_ms = self.clock.now_millis();
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .map(|key| match data.get(key) {
                Some(entry) if !entry.is_expired(now_ms) => match &entry.value {
                    StoredValue::String(value) => Some(value.clone()),
                    StoredValue::SortedSet(_) => None,
                },
                _ => None,
            })
            .collect())
    }

    async fn sliding_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: u64,
        member: &str,
    ) -> Result<WindowSnapshot, StoreError> {
        self.ensure_available()?;
        let clock_ms = self.clock.now_millis();
        let span_ms = i64::try_from(window_ms).unwrap_or(i64::MAX);
        let window_start = now_ms.saturating_sub(span_ms);
        let mut data = self.data.write().await;

        if data.get(key).is_some_and(|e| e.is_expired(clock_ms)) {
            data.remove(key);
        }

        let entry = data.entry(key.to_string()).or_insert_with(|| MemoryEntry {
            value: StoredValue::SortedSet(Vec::new()),
            expires_at_ms: None,
        });
        let StoredValue::SortedSet(members) = &mut entry.value else {
            return Err(StoreError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ));
        };

        members.retain(|(score, _)| *score > window_start);
        let snapshot = WindowSnapshot {
            count: members.len() as u64,
            oldest_ms: members.first().map(|(score, _)| *score),
        };

        let position = members.partition_point(|(score, _)| *score <= now_ms);
        members.insert(position, (now_ms, member.to_string()));
        entry.expires_at_ms = Some(clock_ms.saturating_add(span_ms));

        Ok(snapshot)
    }

    async fn incr_capped(
        &self,
        key: &str,
        seed: u64,
        max: u64,
        expire_at_ms: i64,
    ) -> Result<CappedCount, StoreError> {
        self.ensure_available()?;
        let now_ms = self.clock.now_millis();
        let mut data = self.data.write().await;

        let current = match data.get(key) {
            Some(entry) if !entry.is_expired(now_ms) => match &entry.value {
                StoredValue::String(value) => value.parse::<u64>().map_err(|_| {
                    StoreError::Command("ERR value is not an integer".to_string())
                })?,
                StoredValue::SortedSet(_) => {
                    return Err(StoreError::Command(
                        "WRONGTYPE Operation against a key holding the wrong kind of value"
                            .to_string(),
                    ));
                }
            },
            _ => seed,
        };

        let current = current.min(max);
        let (value, incremented) = if current < max {
            (current + 1, true)
        } else {
            (current, false)
        };

        data.insert(
            key.to_string(),
            MemoryEntry {
                value: StoredValue::String(value.to_string()),
                expires_at_ms: Some(expire_at_ms),
            },
        );

        Ok(CappedCount { value, incremented })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, InMemoryStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = InMemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_ex_expires_lazily() {
        let (clock, store) = store();
        store.set_ex("k", "v", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_and_mget() {
        let (_, store) = store();
        store.set_ex("ns:key:1", "a", Duration::from_secs(60)).await.unwrap();
        store.set_ex("ns:key:2", "b", Duration::from_secs(60)).await.unwrap();
        store.set_ex("ns:prefix:x", "c", Duration::from_secs(60)).await.unwrap();

        let mut keys = store.keys("ns:key:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ns:key:1".to_string(), "ns:key:2".to_string()]);

        let values = store
            .mget(&["ns:key:1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("a".to_string()), None]);
    }

    #[tokio::test]
    async fn test_sliding_window_prunes_old_entries() {
        let (_, store) = store();
        let first = store.sliding_window("w", 1_000, 100, "a").await.unwrap();
        let second = store.sliding_window("w", 1_050, 100, "b").await.unwrap();
        let third = store.sliding_window("w", 1_100, 100, "c").await.unwrap();

        assert_eq!(first, WindowSnapshot { count: 0, oldest_ms: None });
        assert_eq!(second, WindowSnapshot { count: 1, oldest_ms: Some(1_000) });
        // The entry at 1_000 is exactly one window old and drops out
        assert_eq!(third, WindowSnapshot { count: 1, oldest_ms: Some(1_050) });
    }

    #[tokio::test]
    async fn test_incr_capped_seeds_and_caps() {
        let (clock, store) = store();
        let expire_at = clock.now_millis() + 60_000;

        let first = store.incr_capped("q", 4, 5, expire_at).await.unwrap();
        let second = store.incr_capped("q", 4, 5, expire_at).await.unwrap();

        assert_eq!(first, CappedCount { value: 5, incremented: true });
        assert_eq!(second, CappedCount { value: 5, incremented: false });
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let (_, store) = store();
        store.set_available(false);

        assert!(matches!(store.get("k").await, Err(StoreError::Unavailable(_))));
        assert!(store.ping().await.is_err());
        assert!(store.sliding_window("w", 0, 10, "a").await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("ns:key:*", "ns:key:abc"));
        assert!(!glob_match("ns:key:*", "ns:prefix:abc"));
        assert!(glob_match("*:quota:*", "ns:quota:1:2"));
        assert!(glob_match("exact", "exact"));
    }
}
