//! Route-scoped rate limiting

use std::sync::Arc;

use super::RateLimiter;
use super::types::{RateLimitKey, RateLimitResult};
use crate::domain::auth::ApiKeyId;

/// Rate limiter counting per (key, route) pair
///
/// Same contract as [`RateLimiter`], over counters independent from the
/// key-wide ones.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    inner: Arc<dyn RateLimiter>,
}

impl EndpointRateLimiter {
    pub fn new(inner: Arc<dyn RateLimiter>) -> Self {
        Self { inner }
    }

    pub async fn check(&self, id: &ApiKeyId, route: &str, max: u32, window_ms: u64) -> RateLimitResult {
        let key = RateLimitKey::Endpoint(*id, route.to_string());
        self.inner.check(&key, max, window_ms).await
    }

    pub async fn reset(&self, id: &ApiKeyId) {
        self.inner.reset(id).await;
    }
}
