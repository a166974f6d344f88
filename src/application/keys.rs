//! API key lifecycle use cases
//!
//! Creation, rotation and revocation. Revocation is the only mutation that
//! can make a cached record unsafe, so it invalidates the cache entry and
//! its prefix shard and clears the key's rate counters.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::domain::auth::{
    ApiKeyId, ApiKeyRecord, IApiKeyRepository, KeyError, NewApiKey, QuotaPeriod,
};
use crate::domain::clock::Clock;
use crate::infrastructure::auth::{IpPattern, TokenCodec};
use crate::infrastructure::cache::KeyCache;
use crate::infrastructure::rate_limiter::{MAX_WINDOW_MS, RateLimiter};

const MAX_NAME_LENGTH: usize = 255;

/// Fields accepted when issuing a key
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_whitelist: Vec<String>,
    pub ip_blacklist: Vec<String>,
    pub rate_limit_max: Option<u32>,
    pub rate_limit_window_ms: Option<u64>,
    pub quota_max: Option<u64>,
    pub quota_period: Option<QuotaPeriod>,
}

impl CreateApiKeyRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn validate(&self, now: DateTime<Utc>) -> Result<(), KeyError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(KeyError::invalid_input("name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(KeyError::invalid_input(format!(
                "name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }

        if self.rate_limit_max == Some(0) {
            return Err(KeyError::invalid_input("rate_limit_max must be positive"));
        }
        match self.rate_limit_window_ms {
            Some(0) => return Err(KeyError::invalid_input("rate_limit_window_ms must be positive")),
            Some(window_ms) if window_ms > MAX_WINDOW_MS => {
                return Err(KeyError::invalid_input(format!(
                    "rate_limit_window_ms must be at most {}",
                    MAX_WINDOW_MS
                )));
            }
            _ => {}
        }

        match (self.quota_max, self.quota_period) {
            (Some(0), _) => return Err(KeyError::invalid_input("quota_max must be positive")),
            (Some(_), None) | (None, Some(_)) => {
                return Err(KeyError::invalid_input(
                    "quota_max and quota_period must be set together",
                ));
            }
            _ => {}
        }

        for pattern in self.ip_whitelist.iter().chain(&self.ip_blacklist) {
            pattern
                .parse::<IpPattern>()
                .map_err(|e| KeyError::invalid_input(e.to_string()))?;
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(KeyError::invalid_input("expires_at must be in the future"));
            }
        }

        Ok(())
    }
}

/// Issues, rotates and revokes API keys
pub struct ApiKeyService {
    repository: Arc<dyn IApiKeyRepository>,
    codec: Arc<TokenCodec>,
    cache: Option<Arc<dyn KeyCache>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    clock: Arc<dyn Clock>,
}

impl ApiKeyService {
    pub fn new(
        repository: Arc<dyn IApiKeyRepository>,
        codec: Arc<TokenCodec>,
        cache: Option<Arc<dyn KeyCache>>,
        rate_limiter: Option<Arc<dyn RateLimiter>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            codec,
            cache,
            rate_limiter,
            clock,
        }
    }

    /// Issue a key; the plaintext token is returned exactly once
    pub async fn create(&self, request: CreateApiKeyRequest) -> Result<(String, ApiKeyRecord), KeyError> {
        request.validate(self.clock.now())?;

        let new_key = NewApiKey {
            name: request.name.trim().to_string(),
            scopes: request.scopes,
            expires_at: request.expires_at,
            ip_whitelist: request.ip_whitelist,
            ip_blacklist: request.ip_blacklist,
            rate_limit_max: request.rate_limit_max,
            rate_limit_window_ms: request.rate_limit_window_ms,
            quota_max: request.quota_max,
            quota_period: request.quota_period,
            ..Default::default()
        };

        self.issue(new_key).await
    }

    /// Replace a key with a fresh token carrying the same policy
    pub async fn rotate(&self, id: &ApiKeyId) -> Result<(String, ApiKeyRecord), KeyError> {
        let existing = self.require_active(id).await?;

        let new_key = NewApiKey {
            name: existing.name.clone(),
            scopes: existing.scopes.clone(),
            expires_at: existing.expires_at,
            ip_whitelist: existing.ip_whitelist.clone(),
            ip_blacklist: existing.ip_blacklist.clone(),
            rate_limit_max: existing.rate_limit_max,
            rate_limit_window_ms: existing.rate_limit_window_ms,
            quota_max: existing.quota_max,
            quota_period: existing.quota_period,
            ..Default::default()
        };

        let issued = self.issue(new_key).await?;
        self.revoke_record(&existing).await?;

        info!(old_key_id = %existing.id, new_key_id = %issued.1.id, "API key rotated");
        Ok(issued)
    }

    /// Revoke a key; `AlreadyRevoked` if it was revoked before
    pub async fn revoke(&self, id: &ApiKeyId) -> Result<ApiKeyRecord, KeyError> {
        let existing = self.require_active(id).await?;
        let revoked = self.revoke_record(&existing).await?;

        info!(key_id = %id, prefix = %revoked.key_prefix, "API key revoked");
        Ok(revoked)
    }

    pub async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKeyRecord>, KeyError> {
        self.repository.find_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<ApiKeyRecord>, KeyError> {
        self.repository.find_all().await
    }

    pub async fn list_active(&self) -> Result<Vec<ApiKeyRecord>, KeyError> {
        self.repository.find_all_active().await
    }

    async fn issue(&self, new_key: NewApiKey) -> Result<(String, ApiKeyRecord), KeyError> {
        self.persist(self.codec.generate(), new_key).await
    }

    async fn persist(&self, token: String, mut new_key: NewApiKey) -> Result<(String, ApiKeyRecord), KeyError> {
        new_key.key_prefix = TokenCodec::prefix(&token)
            .ok_or_else(|| KeyError::Hashing {
                message: "token is shorter than its prefix".to_string(),
            })?;
        new_key.hashed_key = self.codec.hash(token.clone()).await?;

        let record = self.repository.create(new_key).await?;
        // Drop any shard cached before this key existed
        if let Some(cache) = &self.cache {
            cache.invalidate_by_prefix(&record.key_prefix).await;
        }
        info!(
            key_id = %record.id,
            token = %TokenCodec::mask(&token),
            name = %record.name,
            "API key created"
        );

        Ok((token, record))
    }

    async fn require_active(&self, id: &ApiKeyId) -> Result<ApiKeyRecord, KeyError> {
        let record = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(KeyError::NotFound { id: *id })?;

        if record.is_revoked() {
            return Err(KeyError::AlreadyRevoked { id: *id });
        }
        Ok(record)
    }

    async fn revoke_record(&self, record: &ApiKeyRecord) -> Result<ApiKeyRecord, KeyError> {
        let revoked = self.repository.revoke(&record.id).await?;

        if let Some(cache) = &self.cache {
            cache.invalidate(&record.id).await;
            cache.invalidate_by_prefix(&record.key_prefix).await;
        }
        if let Some(limiter) = &self.rate_limiter {
            limiter.reset(&record.id).await;
        }

        Ok(revoked)
    }
}
