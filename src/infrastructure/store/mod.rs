//! Distributed store clients
//!
//! Provides the shared key-value store behind the distributed cache, rate
//! limiter and quota tracker:
//! - Dragonfly/Redis for distributed, production use
//! - In-memory with the same semantics for development, single-instance
//!   deployments and tests

pub mod dragonfly;
pub mod memory;

pub use dragonfly::DragonflyStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use std::time::Duration;

/// Distributed store errors
///
/// These never escape the cache, limiter and quota layers: every consumer
/// converts them into a fallback to its local tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Store value could not be decoded: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// State of a sliding window observed by one atomic check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries inside the window before the current attempt was inserted
    pub count: u64,
    /// Score (Unix ms) of the oldest entry inside the window before insert
    pub oldest_ms: Option<i64>,
}

/// Result of a capped increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CappedCount {
    /// Counter value after the operation
    pub value: u64,
    /// False when the counter was already at its cap
    pub incremented: bool,
}

/// Redis-compatible store operations used by the distributed tiers
#[async_trait]
pub trait DistributedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn del(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Keys matching a glob pattern (`*` wildcards)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Atomic sliding-window step on a sorted set scored by Unix ms
    ///
    /// Prunes entries with a score at or before `now_ms - window_ms`, counts
    /// and reads the oldest remaining entry, inserts `member` at `now_ms`
    /// and sets the set to expire after `window_ms`, all in one atomic unit.
    async fn sliding_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: u64,
        member: &str,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Atomic capped increment
    ///
    /// A missing counter starts from `seed`. The counter is never raised past
    /// `max` and the call is a no-op once it is there. The key expires at
    /// `expire_at_ms` (Unix ms).
    async fn incr_capped(
        &self,
        key: &str,
        seed: u64,
        max: u64,
        expire_at_ms: i64,
    ) -> Result<CappedCount, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Unique sorted-set member for an attempt at `now_ms`
pub(crate) fn window_member(now_ms: i64) -> String {
    format!("{}-{}", now_ms, uuid::Uuid::new_v4())
}
