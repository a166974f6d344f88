//! API key repository trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entities::{ApiKeyRecord, NewApiKey};
use super::errors::KeyError;
use super::value_objects::{ApiKeyId, KeyPrefix};

/// Storage adapter for API key records
///
/// The guard never assumes a particular backing store. `revoke` is not
/// expected to detect double revocation; callers pre-check and report
/// [`KeyError::AlreadyRevoked`] themselves.
#[async_trait]
pub trait IApiKeyRepository: Send + Sync {
    /// Persist a new API key and return the stored record
    async fn create(&self, new_key: NewApiKey) -> Result<ApiKeyRecord, KeyError>;

    /// Find an API key by ID
    async fn find_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKeyRecord>, KeyError>;

    /// Find every API key sharing a token prefix
    async fn find_by_key_prefix(&self, prefix: &KeyPrefix) -> Result<Vec<ApiKeyRecord>, KeyError>;

    /// Find all API keys
    async fn find_all(&self) -> Result<Vec<ApiKeyRecord>, KeyError>;

    /// Find all API keys that are neither revoked nor expired
    async fn find_all_active(&self) -> Result<Vec<ApiKeyRecord>, KeyError>;

    /// Revoke an API key (soft delete)
    async fn revoke(&self, id: &ApiKeyId) -> Result<ApiKeyRecord, KeyError>;

    /// Update the last_used_at timestamp for an API key
    async fn update_last_used(&self, id: &ApiKeyId, used_at: DateTime<Utc>) -> Result<ApiKeyRecord, KeyError>;

    /// Persist quota usage for the current period
    async fn update_quota_usage(
        &self,
        id: &ApiKeyId,
        used: u64,
        reset_at: DateTime<Utc>,
    ) -> Result<ApiKeyRecord, KeyError>;
}
