//! Quota tracking
//!
//! Usage is counted against calendar-aligned periods (daily, monthly,
//! yearly, UTC). A period's reset instant is a pure function of "now" and
//! the period, so every process derives the same counter key and rollover
//! needs no coordination.
//!
//! - [`LocalQuotaTracker`]: per-process counters
//! - [`DistributedQuotaTracker`]: counters in Dragonfly/Redis, authoritative
//!   when reachable, mirrored locally and falling back to the local tracker

pub mod distributed;
pub mod local;

pub use distributed::DistributedQuotaTracker;
pub use local::LocalQuotaTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::domain::auth::{ApiKeyId, ApiKeyRecord, IApiKeyRepository, QuotaPeriod};

/// Quota state of a key at check time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub allowed: bool,
    /// None when the key has no quota
    pub limit: Option<u64>,
    pub used: u64,
    /// None means unlimited
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl QuotaStatus {
    /// Status of a key without a quota policy
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: None,
            used: 0,
            remaining: None,
            reset_at: None,
        }
    }

    pub fn limited(max: u64, used: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: used < max,
            limit: Some(max),
            used,
            remaining: Some(max.saturating_sub(used)),
            reset_at: Some(reset_at),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limit.is_some()
    }
}

#[async_trait]
pub trait QuotaTracker: Send + Sync {
    /// Evaluate a key's quota, rolling the period over when it has ended
    async fn check_quota(&self, record: &ApiKeyRecord) -> QuotaStatus;

    /// Count one unit of usage, never raising the counter past `max`
    ///
    /// Persisting the new usage through the storage adapter is best-effort;
    /// failures are logged, not returned.
    async fn increment_usage(&self, id: &ApiKeyId, max: u64, period: QuotaPeriod) -> QuotaStatus;
}

/// Usage a record carries into the period ending at `reset_at`
///
/// Persisted usage belongs to the period it was recorded for; any other
/// period starts from zero.
pub(crate) fn seed_usage(record: &ApiKeyRecord, reset_at: DateTime<Utc>) -> u64 {
    match record.quota_reset_at {
        Some(recorded) if recorded == reset_at => record.quota_used,
        _ => 0,
    }
}

/// Best-effort write-back of usage to the storage adapter
pub(crate) async fn persist_usage(
    repository: &Arc<dyn IApiKeyRepository>,
    id: &ApiKeyId,
    used: u64,
    reset_at: DateTime<Utc>,
) {
    if let Err(e) = repository.update_quota_usage(id, used, reset_at).await {
        warn!(key_id = %id, error = %e, "Failed to persist quota usage");
    }
}
