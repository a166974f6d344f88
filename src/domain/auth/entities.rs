//! API key domain entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::*;

/// API key record aggregate root
///
/// The server-held representation of an issued key: identity, hashed secret,
/// policy and usage counters. Records are never deleted; revocation is a
/// terminal soft state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Unique API key identifier
    pub id: ApiKeyId,
    /// Human-readable name for the API key
    pub name: String,
    /// First characters of the token, used as a lookup shard
    pub key_prefix: KeyPrefix,
    /// Hashed token (never expose raw key)
    pub hashed_key: HashedKey,
    /// Capability strings granted to the key
    pub scopes: Vec<String>,
    /// When this API key expires (None if no expiration)
    pub expires_at: Option<DateTime<Utc>>,
    /// When this API key was revoked (None if still active)
    pub revoked_at: Option<DateTime<Utc>>,
    /// Allowed client IP patterns (empty = unrestricted)
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    /// Denied client IP patterns, evaluated before the whitelist
    #[serde(default)]
    pub ip_blacklist: Vec<String>,
    /// Per-key request limit overriding the default limiter config
    pub rate_limit_max: Option<u32>,
    /// Per-key window length overriding the default limiter config
    pub rate_limit_window_ms: Option<u64>,
    /// Maximum requests per quota period
    pub quota_max: Option<u64>,
    pub quota_period: Option<QuotaPeriod>,
    /// Persisted usage within the current quota period
    #[serde(default)]
    pub quota_used: u64,
    pub quota_reset_at: Option<DateTime<Utc>>,
    /// Last time this API key was used (None if never used)
    pub last_used_at: Option<DateTime<Utc>>,
    /// When this API key was created
    pub created_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    /// Materialize a record from creation fields
    pub fn from_new(id: ApiKeyId, new_key: NewApiKey, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new_key.name,
            key_prefix: new_key.key_prefix,
            hashed_key: new_key.hashed_key,
            scopes: new_key.scopes,
            expires_at: new_key.expires_at,
            revoked_at: None,
            ip_whitelist: new_key.ip_whitelist,
            ip_blacklist: new_key.ip_blacklist,
            rate_limit_max: new_key.rate_limit_max,
            rate_limit_window_ms: new_key.rate_limit_window_ms,
            quota_max: new_key.quota_max,
            quota_period: new_key.quota_period,
            quota_used: 0,
            quota_reset_at: None,
            last_used_at: None,
            created_at,
        }
    }

    /// Check if the API key is revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Check if the API key has expired at the given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Derive the lifecycle state at the given instant
    ///
    /// Revocation wins over expiry.
    pub fn state(&self, now: DateTime<Utc>) -> KeyState {
        if self.is_revoked() {
            KeyState::Revoked
        } else if self.is_expired_at(now) {
            KeyState::Expired
        } else {
            KeyState::Active
        }
    }

    /// Quota policy, if both a maximum and a period are configured
    pub fn quota_policy(&self) -> Option<(u64, QuotaPeriod)> {
        match (self.quota_max, self.quota_period) {
            (Some(max), Some(period)) => Some((max, period)),
            _ => None,
        }
    }

    /// Check whether the key was granted a scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == "*")
    }
}

/// Fields supplied to the storage adapter when a key is created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewApiKey {
    pub name: String,
    pub key_prefix: KeyPrefix,
    pub hashed_key: HashedKey,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_whitelist: Vec<String>,
    pub ip_blacklist: Vec<String>,
    pub rate_limit_max: Option<u32>,
    pub rate_limit_window_ms: Option<u64>,
    pub quota_max: Option<u64>,
    pub quota_period: Option<QuotaPeriod>,
}
