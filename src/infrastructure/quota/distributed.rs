//! Dragonfly-backed quota counters
// cspell:ignore Dragonfly

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::local::LocalQuotaTracker;
use super::{QuotaStatus, QuotaTracker, persist_usage, seed_usage};
use crate::domain::auth::{ApiKeyId, ApiKeyRecord, IApiKeyRepository, QuotaPeriod};
use crate::domain::clock::Clock;
use crate::infrastructure::store::{DistributedStore, StoreError};

/// Counters outlive their period by this many hours so late readers still see them
const EXPIRY_BUFFER_HOURS: i64 = 1;

/// Quota tracker whose counters live in the distributed store
///
/// Counter key: `{ns}:quota:{id}:{reset_ms}`, one per key and period. The
/// distributed counter is authoritative while reachable; the record's
/// persisted usage only seeds a counter that does not exist yet.
pub struct DistributedQuotaTracker {
    store: Arc<dyn DistributedStore>,
    local: Arc<LocalQuotaTracker>,
    repository: Arc<dyn IApiKeyRepository>,
    namespace: String,
    clock: Arc<dyn Clock>,
}

impl DistributedQuotaTracker {
    pub fn new(
        store: Arc<dyn DistributedStore>,
        local: Arc<LocalQuotaTracker>,
        repository: Arc<dyn IApiKeyRepository>,
        namespace: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            local,
            repository,
            namespace: namespace.into(),
            clock,
        }
    }

    fn counter_key(&self, id: &ApiKeyId, reset_at: DateTime<Utc>) -> String {
        format!("{}:quota:{}:{}", self.namespace, id, reset_at.timestamp_millis())
    }

    async fn read_counter(&self, key: &str) -> Result<Option<u64>, StoreError> {
        match self.store.get(key).await? {
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QuotaTracker for DistributedQuotaTracker {
    async fn check_quota(&self, record: &ApiKeyRecord) -> QuotaStatus {
        let Some((max, period)) = record.quota_policy() else {
            return QuotaStatus::unlimited();
        };

        let reset_at = period.next_reset(self.clock.now());
        let key = self.counter_key(&record.id, reset_at);

        match self.read_counter(&key).await {
            Ok(Some(used)) => {
                self.local.mirror(&record.id, used, reset_at).await;
                QuotaStatus::limited(max, used, reset_at)
            }
            Ok(None) => {
                // No distributed counter for this period yet
                let seed = seed_usage(record, reset_at);
                let mirrored = self.local.usage(&record.id, reset_at).await.unwrap_or(0);
                let used = seed.max(mirrored);
                self.local.mirror(&record.id, used, reset_at).await;
                QuotaStatus::limited(max, used, reset_at)
            }
            Err(e) => {
                warn!(key_id = %record.id, error = %e, "Quota store failed, using local counters");
                self.local.check_quota(record).await
            }
        }
    }

    async fn increment_usage(&self, id: &ApiKeyId, max: u64, period: QuotaPeriod) -> QuotaStatus {
        let reset_at = period.next_reset(self.clock.now());
        let key = self.counter_key(id, reset_at);
        let seed = self.local.usage(id, reset_at).await.unwrap_or(0);
        let expire_at_ms = (reset_at + Duration::hours(EXPIRY_BUFFER_HOURS)).timestamp_millis();

        match self.store.incr_capped(&key, seed, max, expire_at_ms).await {
            Ok(count) => {
                self.local.mirror(id, count.value, reset_at).await;
                if count.incremented {
                    persist_usage(&self.repository, id, count.value, reset_at).await;
                } else {
                    debug!(key_id = %id, used = count.value, "Quota counter already at its cap");
                }
                QuotaStatus::limited(max, count.value, reset_at)
            }
            Err(e) => {
                warn!(key_id = %id, error = %e, "Quota store failed, counting locally");
                self.local.increment_usage(id, max, period).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::NewApiKey;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::InMemoryApiKeyRepository;
    use crate::infrastructure::store::InMemoryStore;
    use chrono::TimeZone;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryStore>,
        tracker: DistributedQuotaTracker,
        record: ApiKeyRecord,
    }

    async fn setup(max: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let repository = Arc::new(InMemoryApiKeyRepository::with_clock(clock.clone()));
        let record = repository
            .create(NewApiKey {
                name: "quota".to_string(),
                quota_max: Some(max),
                quota_period: Some(QuotaPeriod::Daily),
                ..Default::default()
            })
            .await
            .unwrap();
        let local = Arc::new(LocalQuotaTracker::with_clock(repository.clone(), clock.clone()));
        let tracker = DistributedQuotaTracker::new(store.clone(), local, repository, "test", clock.clone());
        Fixture { clock, store, tracker, record }
    }

    #[tokio::test]
    async fn test_distributed_counter_is_authoritative() {
        let f = setup(3).await;
        f.tracker.increment_usage(&f.record.id, 3, QuotaPeriod::Daily).await;

        let status = f.tracker.check_quota(&f.record).await;
        assert_eq!(status.used, 1);
        assert_eq!(status.remaining, Some(2));
        assert_eq!(status.reset_at, Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_capped_at_max() {
        let f = setup(2).await;
        for _ in 0..4 {
            f.tracker.increment_usage(&f.record.id, 2, QuotaPeriod::Daily).await;
        }
        let status = f.tracker.check_quota(&f.record).await;
        assert_eq!(status.used, 2);
        assert!(!status.allowed);
    }

    #[tokio::test]
    async fn test_new_period_uses_new_counter() {
        let f = setup(1).await;
        f.tracker.increment_usage(&f.record.id, 1, QuotaPeriod::Daily).await;
        assert!(!f.tracker.check_quota(&f.record).await.allowed);

        f.clock.advance(chrono::Duration::hours(12));
        assert!(f.tracker.check_quota(&f.record).await.allowed);
    }

    #[tokio::test]
    async fn test_outage_falls_back_to_local_mirror() {
        let f = setup(2).await;
        f.tracker.increment_usage(&f.record.id, 2, QuotaPeriod::Daily).await;

        f.store.set_available(false);
        f.tracker.increment_usage(&f.record.id, 2, QuotaPeriod::Daily).await;
        let status = f.tracker.check_quota(&f.record).await;
        assert_eq!(status.used, 2);
        assert!(!status.allowed);
    }
}
