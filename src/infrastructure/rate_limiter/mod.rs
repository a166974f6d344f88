//! Rate limiting
//!
//! - [`LocalRateLimiter`]: per-process fixed window
//! - [`DistributedRateLimiter`]: sliding window in Dragonfly/Redis, falling
//!   back to the local limiter on store failure
//! - [`EndpointRateLimiter`]: the same contract scoped per (key, route)

pub mod endpoint;
pub mod fixed_window;
pub mod sliding_window;
pub mod types;

pub use endpoint::EndpointRateLimiter;
pub use fixed_window::LocalRateLimiter;
pub use sliding_window::DistributedRateLimiter;
pub use types::{MAX_WINDOW_MS, RateLimitKey, RateLimitResult, window_millis};

use async_trait::async_trait;

use crate::domain::auth::ApiKeyId;

/// Rate limiter contract shared by the local and distributed variants
///
/// Checks never fail: a variant that cannot reach its backing state falls
/// back rather than erroring.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count an attempt against `key` and decide whether it is allowed
    async fn check(&self, key: &RateLimitKey, max: u32, window_ms: u64) -> RateLimitResult;

    /// Clear every counter of an API key, key-wide and per-route
    async fn reset(&self, id: &ApiKeyId);
}
