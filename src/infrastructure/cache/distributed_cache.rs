//! Dragonfly-backed key cache with local fallback
// cspell:ignore Dragonfly

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{KeyCache, LocalKeyCache};
use crate::domain::auth::{ApiKeyId, ApiKeyRecord, KeyPrefix};
use crate::infrastructure::store::{DistributedStore, StoreError};

/// Key cache shared across processes through the distributed store
///
/// Layout: `{ns}:key:{id}` holds the record as JSON, `{ns}:prefix:{prefix}`
/// holds the JSON list of ids sharing the prefix. A prefix list that points
/// at a record no longer stored is a miss.
///
/// Every write goes to the local cache first, so a later store outage still
/// serves recently seen records. Store failures are logged and answered from
/// the local cache; callers never see them.
pub struct DistributedKeyCache {
    store: Arc<dyn DistributedStore>,
    local: Arc<LocalKeyCache>,
    namespace: String,
}

impl DistributedKeyCache {
    pub fn new(store: Arc<dyn DistributedStore>, local: Arc<LocalKeyCache>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            local,
            namespace: namespace.into(),
        }
    }

    /// The local tier this cache writes through to and falls back on
    pub fn local(&self) -> &Arc<LocalKeyCache> {
        &self.local
    }

    fn record_key(&self, id: &ApiKeyId) -> String {
        format!("{}:key:{}", self.namespace, id)
    }

    fn prefix_key(&self, prefix: &KeyPrefix) -> String {
        format!("{}:prefix:{}", self.namespace, prefix)
    }

    fn ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.local.default_ttl())
    }

    async fn fetch(&self, id: &ApiKeyId) -> Result<Option<ApiKeyRecord>, StoreError> {
        match self.store.get(&self.record_key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn fetch_prefix_ids(&self, prefix: &KeyPrefix) -> Result<Vec<ApiKeyId>, StoreError> {
        match self.store.get(&self.prefix_key(prefix)).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_by_prefix(&self, prefix: &KeyPrefix) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let ids = self.fetch_prefix_ids(prefix).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let values = self.store.mget(&keys).await?;

        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Some(json) => records.push(serde_json::from_str(&json)?),
                // Partial shard: let the caller re-resolve from the adapter
                None => return Ok(Vec::new()),
            }
        }
        Ok(records)
    }

    async fn store_records(&self, records: &[ApiKeyRecord], ttl: Duration) -> Result<(), StoreError> {
        let mut by_prefix: HashMap<&KeyPrefix, Vec<ApiKeyId>> = HashMap::new();
        for record in records {
            let json = serde_json::to_string(record)?;
            self.store.set_ex(&self.record_key(&record.id), &json, ttl).await?;
            by_prefix.entry(&record.key_prefix).or_default().push(record.id);
        }

        for (prefix, new_ids) in by_prefix {
            let mut ids = self.fetch_prefix_ids(prefix).await?;
            for id in new_ids {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            let json = serde_json::to_string(&ids)?;
            self.store.set_ex(&self.prefix_key(prefix), &json, ttl).await?;
        }
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &KeyPrefix) -> Result<(), StoreError> {
        let mut keys: Vec<String> = self
            .fetch_prefix_ids(prefix)
            .await?
            .iter()
            .map(|id| self.record_key(id))
            .collect();
        keys.push(self.prefix_key(prefix));
        self.store.del(&keys).await
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        let mut keys = self.store.keys(&format!("{}:key:*", self.namespace)).await?;
        keys.extend(self.store.keys(&format!("{}:prefix:*", self.namespace)).await?);
        self.store.del(&keys).await
    }
}

#[async_trait]
impl KeyCache for DistributedKeyCache {
    async fn get(&self, id: &ApiKeyId) -> Option<ApiKeyRecord> {
        match self.fetch(id).await {
            Ok(Some(record)) => {
                debug!(key_id = %id, "Distributed key cache hit");
                self.local.set(&record, None).await;
                Some(record)
            }
            Ok(None) => {
                debug!(key_id = %id, "Distributed key cache miss");
                None
            }
            Err(e) => {
                warn!(key_id = %id, error = %e, "Key cache store failed, using local cache");
                self.local.get(id).await
            }
        }
    }

    async fn get_by_prefix(&self, prefix: &KeyPrefix) -> Vec<ApiKeyRecord> {
        match self.fetch_by_prefix(prefix).await {
            Ok(records) => {
                debug!(prefix = %prefix, candidates = records.len(), "Distributed prefix lookup");
                if !records.is_empty() {
                    self.local.set_many(&records, None).await;
                }
                records
            }
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Key cache store failed, using local cache");
                self.local.get_by_prefix(prefix).await
            }
        }
    }

    async fn set(&self, record: &ApiKeyRecord, ttl: Option<Duration>) {
        self.set_many(std::slice::from_ref(record), ttl).await;
    }

    async fn set_many(&self, records: &[ApiKeyRecord], ttl: Option<Duration>) {
        self.local.set_many(records, ttl).await;
        if let Err(e) = self.store_records(records, self.ttl(ttl)).await {
            warn!(error = %e, count = records.len(), "Failed to write key records to the store");
        }
    }

    async fn invalidate(&self, id: &ApiKeyId) {
        self.local.invalidate(id).await;
        if let Err(e) = self.store.del(&[self.record_key(id)]).await {
            warn!(key_id = %id, error = %e, "Failed to invalidate key record in the store");
        }
    }

    async fn invalidate_by_prefix(&self, prefix: &KeyPrefix) {
        self.local.invalidate_by_prefix(prefix).await;
        if let Err(e) = self.remove_prefix(prefix).await {
            warn!(prefix = %prefix, error = %e, "Failed to invalidate prefix shard in the store");
        }
    }

    async fn clear(&self) {
        self.local.clear().await;
        if let Err(e) = self.remove_all().await {
            warn!(error = %e, "Failed to clear key cache in the store");
        }
    }
}
