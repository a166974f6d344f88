//! Rate limiter types

use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::auth::ApiKeyId;

/// Longest rate-limit window accepted anywhere (31 days)
pub const MAX_WINDOW_MS: u64 = 31 * 24 * 60 * 60 * 1000;

/// Window length in signed milliseconds, clamped to [`MAX_WINDOW_MS`]
pub fn window_millis(window_ms: u64) -> i64 {
    i64::try_from(window_ms.min(MAX_WINDOW_MS)).unwrap_or(i64::MAX)
}

/// Key used to identify rate limit counters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Requests of one API key
    ApiKey(ApiKeyId),
    /// Requests of one API key to one route
    Endpoint(ApiKeyId, String),
}

impl RateLimitKey {
    pub fn key_id(&self) -> &ApiKeyId {
        match self {
            RateLimitKey::ApiKey(id) | RateLimitKey::Endpoint(id, _) => id,
        }
    }

    /// Convert to a Redis-compatible key string
    pub fn to_redis_key(&self, prefix: &str) -> String {
        format!("{}:ratelimit:{}", prefix, self)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::ApiKey(id) => write!(f, "{}", id),
            RateLimitKey::Endpoint(id, route) => write!(f, "{}:{}", id, route),
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// When the window frees capacity again
    pub reset_at: DateTime<Utc>,
    /// Retry-After duration in seconds (only set when blocked)
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// Create a new allowed result
    pub fn allowed(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
        }
    }

    /// Create a new blocked result
    pub fn blocked(limit: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let wait_ms = (reset_at - now).num_milliseconds().max(0) as u64;
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            // Round up so clients never retry early
            retry_after: Some(wait_ms.div_ceil(1000)),
        }
    }

    /// Reset instant as Unix seconds, the header representation
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}
