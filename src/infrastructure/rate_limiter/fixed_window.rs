//! Local fixed-window rate limiter

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::RateLimiter;
use super::types::{RateLimitKey, RateLimitResult, window_millis};
use crate::domain::auth::ApiKeyId;
use crate::domain::clock::{self, Clock, SystemClock};

/// Windows above this count trigger a sweep of finished ones
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at_ms: i64,
}

/// Per-process fixed-window rate limiter
///
/// A request at or after the window's reset instant opens a fresh window.
/// Within a window the counter increments up to `max`; the request that
/// would exceed it is denied without incrementing.
pub struct LocalRateLimiter {
    windows: Mutex<HashMap<RateLimitKey, WindowCounter>>,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drop windows that have already ended
    pub async fn cleanup(&self) {
        let now_ms = self.clock.now_millis();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| now_ms < w.reset_at_ms);
        debug!("Rate limiter cleanup: removed {} windows", before - windows.len());
    }
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn check(&self, key: &RateLimitKey, max: u32, window_ms: u64) -> RateLimitResult {
        let now_ms = self.clock.now_millis();
        let reset_at_ms = now_ms.saturating_add(window_millis(window_ms));
        let mut windows = self.windows.lock().await;

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| now_ms < w.reset_at_ms);
        }

        let window = windows.entry(key.clone()).or_insert(WindowCounter {
            count: 0,
            reset_at_ms,
        });
        if now_ms >= window.reset_at_ms {
            *window = WindowCounter {
                count: 0,
                reset_at_ms,
            };
        }

        let reset_at = clock::from_millis(window.reset_at_ms);
        if window.count < max {
            window.count += 1;
            RateLimitResult::allowed(max, max - window.count, reset_at)
        } else {
            debug!(key = %key, limit = max, "Local rate limit exceeded");
            RateLimitResult::blocked(max, reset_at, clock::from_millis(now_ms))
        }
    }

    async fn reset(&self, id: &ApiKeyId) {
        self.windows.lock().await.retain(|key, _| key.key_id() != id);
    }
}
