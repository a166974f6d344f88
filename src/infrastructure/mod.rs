//! Infrastructure Layer - External concerns and implementations
//!
//! Token hashing, caches, limiters and quota counters, the distributed store
//! client they share, and the reference storage adapter.

pub mod auth;
pub mod cache;
pub mod quota;
pub mod rate_limiter;
pub mod repositories;
pub mod store;

pub use auth::{IpDecision, IpPattern, TokenCodec};
pub use cache::{DistributedKeyCache, KeyCache, LocalKeyCache};
pub use quota::{DistributedQuotaTracker, LocalQuotaTracker, QuotaStatus, QuotaTracker};
pub use rate_limiter::{
    DistributedRateLimiter, EndpointRateLimiter, LocalRateLimiter, RateLimitKey, RateLimitResult,
    RateLimiter,
};
pub use repositories::InMemoryApiKeyRepository;
pub use store::{DistributedStore, DragonflyStore, InMemoryStore, StoreError};
