//! In-process key cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{DEFAULT_TTL, KeyCache};
use crate::domain::auth::{ApiKeyId, ApiKeyRecord, KeyPrefix};
use crate::domain::clock::{Clock, SystemClock};

struct CacheEntry {
    record: ApiKeyRecord,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ApiKeyId, CacheEntry>,
    /// prefix -> ids of cached records carrying it
    prefixes: HashMap<KeyPrefix, HashSet<ApiKeyId>>,
}

impl CacheState {
    fn insert(&mut self, record: ApiKeyRecord, expires_at: DateTime<Utc>) {
        // Drop a stale prefix index entry if the prefix changed
        if let Some(previous) = self.entries.get(&record.id)
            && previous.record.key_prefix != record.key_prefix
        {
            let old_prefix = previous.record.key_prefix.clone();
            self.unindex(&old_prefix, &record.id);
        }

        self.prefixes
            .entry(record.key_prefix.clone())
            .or_default()
            .insert(record.id);
        self.entries.insert(record.id, CacheEntry { record, expires_at });
    }

    fn remove(&mut self, id: &ApiKeyId) {
        if let Some(entry) = self.entries.remove(id) {
            self.unindex(&entry.record.key_prefix, id);
        }
    }

    fn unindex(&mut self, prefix: &KeyPrefix, id: &ApiKeyId) {
        if let Some(ids) = self.prefixes.get_mut(prefix) {
            ids.remove(id);
            if ids.is_empty() {
                self.prefixes.remove(prefix);
            }
        }
    }
}

/// In-process key cache
///
/// Entries carry an absolute expiry and are evicted lazily when a read finds
/// them stale; there is no background sweeper.
pub struct LocalKeyCache {
    state: RwLock<CacheState>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl LocalKeyCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            default_ttl,
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn expiry(&self, ttl: Option<Duration>) -> DateTime<Utc> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for LocalKeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl KeyCache for LocalKeyCache {
    async fn get(&self, id: &ApiKeyId) -> Option<ApiKeyRecord> {
        let now = self.clock.now();
        {
            let state = self.state.read().await;
            match state.entries.get(id) {
                Some(entry) if now < entry.expires_at => return Some(entry.record.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut state = self.state.write().await;
        if state.entries.get(id).is_some_and(|e| now >= e.expires_at) {
            state.remove(id);
            tracing::debug!(key_id = %id, "Evicted expired key cache entry");
        }
        None
    }

    async fn get_by_prefix(&self, prefix: &KeyPrefix) -> Vec<ApiKeyRecord> {
        let now = self.clock.now();
        let mut live = Vec::new();
        let mut expired = Vec::new();
        {
            let state = self.state.read().await;
            let Some(ids) = state.prefixes.get(prefix) else {
                return live;
            };
            for id in ids {
                match state.entries.get(id) {
                    Some(entry) if now < entry.expires_at => live.push(entry.record.clone()),
                    _ => expired.push(*id),
                }
            }
        }

        if !expired.is_empty() {
            let mut state = self.state.write().await;
            for id in &expired {
                if state.entries.get(id).is_none_or(|e| now >= e.expires_at) {
                    state.remove(id);
                    state.unindex(prefix, id);
                }
            }
            tracing::debug!(prefix = %prefix, evicted = expired.len(), "Evicted expired key cache entries");
        }

        live
    }

    async fn set(&self, record: &ApiKeyRecord, ttl: Option<Duration>) {
        let expires_at = self.expiry(ttl);
        self.state.write().await.insert(record.clone(), expires_at);
    }

    async fn set_many(&self, records: &[ApiKeyRecord], ttl: Option<Duration>) {
        let expires_at = self.expiry(ttl);
        let mut state = self.state.write().await;
        for record in records {
            state.insert(record.clone(), expires_at);
        }
    }

    async fn invalidate(&self, id: &ApiKeyId) {
        self.state.write().await.remove(id);
    }

    async fn invalidate_by_prefix(&self, prefix: &KeyPrefix) {
        let mut state = self.state.write().await;
        if let Some(ids) = state.prefixes.remove(prefix) {
            for id in ids {
                state.entries.remove(&id);
            }
        }
    }

    async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.prefixes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::{HashedKey, NewApiKey};
    use crate::domain::clock::ManualClock;

    fn record(prefix: &str) -> ApiKeyRecord {
        ApiKeyRecord::from_new(
            ApiKeyId::generate(),
            NewApiKey {
                name: "test".to_string(),
                key_prefix: KeyPrefix::from(prefix.to_string()),
                hashed_key: HashedKey::new("$2b$04$hash".to_string()),
                ..Default::default()
            },
            Utc::now(),
        )
    }

    fn cache() -> (Arc<ManualClock>, LocalKeyCache) {
        let clock = Arc::new(ManualClock::starting_now());
        (clock.clone(), LocalKeyCache::with_clock(DEFAULT_TTL, clock))
    }

    #[tokio::test]
    async fn test_get_and_prefix_lookup() {
        let (_, cache) = cache();
        let a = record("aaaa1111");
        let b = record("aaaa1111");
        let c = record("bbbb2222");
        cache.set_many(&[a.clone(), b.clone(), c.clone()], None).await;

        assert_eq!(cache.get(&a.id).await, Some(a.clone()));
        let mut shard: Vec<_> = cache
            .get_by_prefix(&a.key_prefix)
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        shard.sort_by_key(|id| id.to_string());
        let mut expected = vec![a.id, b.id];
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(shard, expected);
    }

    #[tokio::test]
    async fn test_entries_expire_lazily() {
        let (clock, cache) = cache();
        let a = record("aaaa1111");
        cache.set(&a, Some(Duration::from_secs(10))).await;

        clock.advance(chrono::Duration::seconds(9));
        assert!(cache.get(&a.id).await.is_some());

        clock.advance(chrono::Duration::seconds(1));
        // Still stored until a read notices it
        assert_eq!(cache.len().await, 1);
        assert!(cache.get_by_prefix(&a.key_prefix).await.is_empty());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_removes_from_prefix_index() {
        let (_, cache) = cache();
        let a = record("aaaa1111");
        let b = record("aaaa1111");
        cache.set_many(&[a.clone(), b.clone()], None).await;

        cache.invalidate(&a.id).await;
        assert!(cache.get(&a.id).await.is_none());
        assert_eq!(cache.get_by_prefix(&a.key_prefix).await, vec![b.clone()]);

        cache.invalidate_by_prefix(&b.key_prefix).await;
        assert!(cache.get(&b.id).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let (_, cache) = cache();
        cache.set(&record("aaaa1111"), None).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
