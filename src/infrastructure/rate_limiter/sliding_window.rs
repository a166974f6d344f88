//! Distributed sliding-window rate limiter
//!
//! Each key owns a sorted set of attempt timestamps in the distributed
//! store. One atomic pipeline prunes attempts older than the window, counts
//! the rest, inserts the current attempt and refreshes the set's expiry. The
//! decision uses the count from before the insert, so concurrent callers
//! across processes never admit more than `max` per window.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::RateLimiter;
use super::fixed_window::LocalRateLimiter;
use super::types::{MAX_WINDOW_MS, RateLimitKey, RateLimitResult, window_millis};
use crate::domain::auth::ApiKeyId;
use crate::domain::clock::{self, Clock};
use crate::infrastructure::store::{DistributedStore, window_member};

/// Sliding-window limiter over the distributed store
///
/// Falls back to the local fixed-window limiter for any call the store
/// cannot serve.
pub struct DistributedRateLimiter {
    store: Arc<dyn DistributedStore>,
    local: Arc<LocalRateLimiter>,
    namespace: String,
    clock: Arc<dyn Clock>,
}

impl DistributedRateLimiter {
    pub fn new(
        store: Arc<dyn DistributedStore>,
        local: Arc<LocalRateLimiter>,
        namespace: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            local,
            namespace: namespace.into(),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for DistributedRateLimiter {
    async fn check(&self, key: &RateLimitKey, max: u32, window_ms: u64) -> RateLimitResult {
        let window_ms = window_ms.min(MAX_WINDOW_MS);
        let now_ms = self.clock.now_millis();
        let redis_key = key.to_redis_key(&self.namespace);

        let snapshot = match self
            .store
            .sliding_window(&redis_key, now_ms, window_ms, &window_member(now_ms))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit store failed, using local fixed window");
                return self.local.check(key, max, window_ms).await;
            }
        };

        // Capacity frees up when the oldest counted attempt leaves the window
        let oldest_ms = snapshot.oldest_ms.unwrap_or(now_ms);
        let reset_at = clock::from_millis(oldest_ms.saturating_add(window_millis(window_ms)));

        if snapshot.count < u64::from(max) {
            let remaining = (u64::from(max) - snapshot.count - 1) as u32;
            RateLimitResult::allowed(max, remaining, reset_at)
        } else {
            debug!(key = %key, limit = max, count = snapshot.count, "Distributed rate limit exceeded");
            RateLimitResult::blocked(max, reset_at, clock::from_millis(now_ms))
        }
    }

    async fn reset(&self, id: &ApiKeyId) {
        self.local.reset(id).await;

        let pattern = format!("{}*", RateLimitKey::ApiKey(*id).to_redis_key(&self.namespace));
        let result = match self.store.keys(&pattern).await {
            Ok(keys) => self.store.del(&keys).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(key_id = %id, error = %e, "Failed to reset distributed rate limit counters");
        }
    }
}
