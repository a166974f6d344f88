//! In-memory API key repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::auth::{
    ApiKeyId, ApiKeyRecord, IApiKeyRepository, KeyError, KeyPrefix, KeyState, NewApiKey,
};
use crate::domain::clock::{Clock, SystemClock};

/// Reference storage adapter keeping records in process memory
///
/// `set_available(false)` makes every call fail with [`KeyError::Storage`],
/// which lets callers exercise their adapter-failure paths.
pub struct InMemoryApiKeyRepository {
    records: RwLock<HashMap<ApiKeyId, ApiKeyRecord>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), KeyError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KeyError::storage("API key repository unavailable"))
        }
    }

    async fn update<F>(&self, id: &ApiKeyId, apply: F) -> Result<ApiKeyRecord, KeyError>
    where
        F: FnOnce(&mut ApiKeyRecord) + Send,
    {
        self.ensure_available()?;
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or(KeyError::NotFound { id: *id })?;
        apply(record);
        Ok(record.clone())
    }
}

impl Default for InMemoryApiKeyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IApiKeyRepository for InMemoryApiKeyRepository {
    async fn create(&self, new_key: NewApiKey) -> Result<ApiKeyRecord, KeyError> {
        self.ensure_available()?;
        let record = ApiKeyRecord::from_new(ApiKeyId::generate(), new_key, self.clock.now());
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKeyRecord>, KeyError> {
        self.ensure_available()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_key_prefix(&self, prefix: &KeyPrefix) -> Result<Vec<ApiKeyRecord>, KeyError> {
        self.ensure_available()?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| &r.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<ApiKeyRecord>, KeyError> {
        self.ensure_available()?;
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn find_all_active(&self) -> Result<Vec<ApiKeyRecord>, KeyError> {
        let now = self.clock.now();
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|r| r.state(now) == KeyState::Active)
            .collect())
    }

    async fn revoke(&self, id: &ApiKeyId) -> Result<ApiKeyRecord, KeyError> {
        let now = self.clock.now();
        self.update(id, |record| {
            // Revocation is terminal; keep the first timestamp
            record.revoked_at.get_or_insert(now);
        })
        .await
    }

    async fn update_last_used(&self, id: &ApiKeyId, used_at: DateTime<Utc>) -> Result<ApiKeyRecord, KeyError> {
        self.update(id, |record| record.last_used_at = Some(used_at)).await
    }

    async fn update_quota_usage(
        &self,
        id: &ApiKeyId,
        used: u64,
        reset_at: DateTime<Utc>,
    ) -> Result<ApiKeyRecord, KeyError> {
        self.update(id, |record| {
            record.quota_used = used;
            record.quota_reset_at = Some(reset_at);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;

    fn new_key(name: &str, prefix: &str) -> NewApiKey {
        NewApiKey {
            name: name.to_string(),
            key_prefix: KeyPrefix::from(prefix.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repository = InMemoryApiKeyRepository::new();
        let a = repository.create(new_key("a", "aaaa1111")).await.unwrap();
        repository.create(new_key("b", "aaaa1111")).await.unwrap();
        repository.create(new_key("c", "cccc3333")).await.unwrap();

        assert_eq!(repository.find_by_id(&a.id).await.unwrap(), Some(a.clone()));
        assert_eq!(repository.find_by_key_prefix(&a.key_prefix).await.unwrap().len(), 2);
        assert_eq!(repository.find_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_revoke_is_terminal() {
        let clock = Arc::new(ManualClock::starting_now());
        let repository = InMemoryApiKeyRepository::with_clock(clock.clone());
        let key = repository.create(new_key("a", "aaaa1111")).await.unwrap();

        let first = repository.revoke(&key.id).await.unwrap();
        clock.advance(chrono::Duration::minutes(1));
        let second = repository.revoke(&key.id).await.unwrap();

        assert_eq!(first.revoked_at, second.revoked_at);
        assert!(repository.find_all_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_excludes_expired() {
        let clock = Arc::new(ManualClock::starting_now());
        let repository = InMemoryApiKeyRepository::with_clock(clock.clone());
        let mut expiring = new_key("a", "aaaa1111");
        expiring.expires_at = Some(clock.now() + chrono::Duration::minutes(5));
        repository.create(expiring).await.unwrap();

        assert_eq!(repository.find_all_active().await.unwrap().len(), 1);
        clock.advance(chrono::Duration::minutes(5));
        assert!(repository.find_all_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_and_outage() {
        let repository = InMemoryApiKeyRepository::new();
        let id = ApiKeyId::generate();
        assert_eq!(repository.revoke(&id).await, Err(KeyError::NotFound { id }));

        repository.set_available(false);
        assert!(matches!(repository.find_all().await, Err(KeyError::Storage { .. })));
    }
}
