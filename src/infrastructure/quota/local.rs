//! Per-process quota counters

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{QuotaStatus, QuotaTracker, persist_usage, seed_usage};
use crate::domain::auth::{ApiKeyId, ApiKeyRecord, IApiKeyRepository, QuotaPeriod};
use crate::domain::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QuotaCounter {
    used: u64,
    reset_at: DateTime<Utc>,
}

/// Quota tracker keeping counters in process memory
pub struct LocalQuotaTracker {
    counters: Mutex<HashMap<ApiKeyId, QuotaCounter>>,
    repository: Arc<dyn IApiKeyRepository>,
    clock: Arc<dyn Clock>,
}

impl LocalQuotaTracker {
    pub fn new(repository: Arc<dyn IApiKeyRepository>) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock))
    }

    pub fn with_clock(repository: Arc<dyn IApiKeyRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            repository,
            clock,
        }
    }

    /// Usage counted locally for the period ending at `reset_at`
    pub async fn usage(&self, id: &ApiKeyId, reset_at: DateTime<Utc>) -> Option<u64> {
        self.counters
            .lock()
            .await
            .get(id)
            .filter(|c| c.reset_at == reset_at)
            .map(|c| c.used)
    }

    /// Raise the local counter to at least `used` for the period
    ///
    /// Takes the max so a lagging mirror never lowers what was observed.
    pub async fn mirror(&self, id: &ApiKeyId, used: u64, reset_at: DateTime<Utc>) {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(*id).or_insert(QuotaCounter { used, reset_at });
        if counter.reset_at != reset_at {
            *counter = QuotaCounter { used, reset_at };
        } else {
            counter.used = counter.used.max(used);
        }
    }

    /// Drop the counters of a key
    pub async fn reset(&self, id: &ApiKeyId) {
        self.counters.lock().await.remove(id);
    }
}

#[async_trait]
impl QuotaTracker for LocalQuotaTracker {
    async fn check_quota(&self, record: &ApiKeyRecord) -> QuotaStatus {
        let Some((max, period)) = record.quota_policy() else {
            return QuotaStatus::unlimited();
        };

        let reset_at = period.next_reset(self.clock.now());
        let seed = seed_usage(record, reset_at);
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry(record.id)
            .or_insert(QuotaCounter { used: seed, reset_at });

        if counter.reset_at != reset_at {
            debug!(key_id = %record.id, period = %period, "Quota period rolled over");
            *counter = QuotaCounter { used: seed, reset_at };
        } else {
            counter.used = counter.used.max(seed);
        }

        QuotaStatus::limited(max, counter.used, reset_at)
    }

    async fn increment_usage(&self, id: &ApiKeyId, max: u64, period: QuotaPeriod) -> QuotaStatus {
        let reset_at = period.next_reset(self.clock.now());
        let (used, incremented) = {
            let mut counters = self.counters.lock().await;
            let counter = counters.entry(*id).or_insert(QuotaCounter { used: 0, reset_at });
            if counter.reset_at != reset_at {
                *counter = QuotaCounter { used: 0, reset_at };
            }
            if counter.used < max {
                counter.used += 1;
                (counter.used, true)
            } else {
                (counter.used, false)
            }
        };

        if incremented {
            persist_usage(&self.repository, id, used, reset_at).await;
        }
        QuotaStatus::limited(max, used, reset_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::NewApiKey;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::InMemoryApiKeyRepository;
    use chrono::TimeZone;

    async fn setup() -> (Arc<ManualClock>, Arc<InMemoryApiKeyRepository>, LocalQuotaTracker, ApiKeyRecord) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 14, 22, 0, 0).unwrap()));
        let repository = Arc::new(InMemoryApiKeyRepository::with_clock(clock.clone()));
        let record = repository
            .create(NewApiKey {
                name: "quota".to_string(),
                quota_max: Some(2),
                quota_period: Some(QuotaPeriod::Daily),
                ..Default::default()
            })
            .await
            .unwrap();
        let tracker = LocalQuotaTracker::with_clock(repository.clone(), clock.clone());
        (clock, repository, tracker, record)
    }

    #[tokio::test]
    async fn test_no_policy_is_unlimited() {
        let (_, _, tracker, mut record) = setup().await;
        record.quota_max = None;
        assert_eq!(tracker.check_quota(&record).await, QuotaStatus::unlimited());
    }

    #[tokio::test]
    async fn test_increments_are_capped_and_persisted() {
        let (_, repository, tracker, record) = setup().await;

        for _ in 0..5 {
            tracker.increment_usage(&record.id, 2, QuotaPeriod::Daily).await;
        }
        let status = tracker.check_quota(&record).await;
        assert_eq!(status.used, 2);
        assert!(!status.allowed);
        assert_eq!(status.remaining, Some(0));

        let stored = repository.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.quota_used, 2);
        assert_eq!(stored.quota_reset_at, Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_rollover_at_midnight() {
        let (clock, _, tracker, record) = setup().await;
        tracker.increment_usage(&record.id, 2, QuotaPeriod::Daily).await;
        tracker.increment_usage(&record.id, 2, QuotaPeriod::Daily).await;
        assert!(!tracker.check_quota(&record).await.allowed);

        clock.advance(chrono::Duration::hours(2));
        let status = tracker.check_quota(&record).await;
        assert!(status.allowed);
        assert_eq!(status.used, 0);
        assert_eq!(status.reset_at, Some(Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_persisted_usage_seeds_current_period_only() {
        let (clock, _, tracker, mut record) = setup().await;
        record.quota_used = 2;
        record.quota_reset_at = Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert!(!tracker.check_quota(&record).await.allowed);

        clock.advance(chrono::Duration::days(1));
        assert!(tracker.check_quota(&record).await.allowed);
    }
}
