//! Key record caching
//!
//! Two implementations share the [`KeyCache`] contract:
//! - [`LocalKeyCache`]: in-process, per-entry expiry, lazily evicted on read
//! - [`DistributedKeyCache`]: Dragonfly/Redis backed, write-through to a
//!   local cache it falls back to on any store failure
//!
//! Cache operations never fail from the caller's point of view; a cache is a
//! disposable projection of the storage adapter.

pub mod distributed_cache;
pub mod memory_cache;

pub use distributed_cache::DistributedKeyCache;
pub use memory_cache::LocalKeyCache;

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::auth::{ApiKeyId, ApiKeyRecord, KeyPrefix};

/// Default staleness bound for cached key records
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[async_trait]
pub trait KeyCache: Send + Sync {
    async fn get(&self, id: &ApiKeyId) -> Option<ApiKeyRecord>;

    /// Cached records sharing a prefix; empty on miss or on any data-source error
    async fn get_by_prefix(&self, prefix: &KeyPrefix) -> Vec<ApiKeyRecord>;

    /// Cache a record; `None` uses the cache's default TTL
    async fn set(&self, record: &ApiKeyRecord, ttl: Option<Duration>);

    async fn set_many(&self, records: &[ApiKeyRecord], ttl: Option<Duration>);

    async fn invalidate(&self, id: &ApiKeyId);

    async fn invalidate_by_prefix(&self, prefix: &KeyPrefix);

    async fn clear(&self);
}
