//! API key domain errors

use std::fmt;

use thiserror::Error;

use super::value_objects::ApiKeyId;

/// Reason a request was refused by policy
///
/// Each reason has a stable machine-readable code and belongs to one
/// client-facing class (unauthorized, forbidden, too many requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    MissingApiKey,
    InvalidApiKey,
    ApiKeyRevoked,
    ApiKeyExpired,
    IpBlocked,
    IpNotAllowed,
    RateLimitExceeded,
    EndpointRateLimitExceeded,
    QuotaExceeded,
}

/// Client-facing class of a policy denial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialClass {
    Unauthorized,
    Forbidden,
    TooManyRequests,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::MissingApiKey => "missing_api_key",
            DenyReason::InvalidApiKey => "invalid_api_key",
            DenyReason::ApiKeyRevoked => "api_key_revoked",
            DenyReason::ApiKeyExpired => "api_key_expired",
            DenyReason::IpBlocked => "ip_blocked",
            DenyReason::IpNotAllowed => "ip_not_allowed",
            DenyReason::RateLimitExceeded => "rate_limit_exceeded",
            DenyReason::EndpointRateLimitExceeded => "endpoint_rate_limit_exceeded",
            DenyReason::QuotaExceeded => "quota_exceeded",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::MissingApiKey => "API key is required",
            DenyReason::InvalidApiKey => "API key is invalid",
            DenyReason::ApiKeyRevoked => "API key has been revoked",
            DenyReason::ApiKeyExpired => "API key has expired",
            DenyReason::IpBlocked => "Client IP address is blocked for this API key",
            DenyReason::IpNotAllowed => "Client IP address is not allowed for this API key",
            DenyReason::RateLimitExceeded => "Rate limit exceeded",
            DenyReason::EndpointRateLimitExceeded => "Endpoint rate limit exceeded",
            DenyReason::QuotaExceeded => "Quota exceeded",
        }
    }

    pub fn class(&self) -> DenialClass {
        match self {
            DenyReason::MissingApiKey
            | DenyReason::InvalidApiKey
            | DenyReason::ApiKeyRevoked
            | DenyReason::ApiKeyExpired => DenialClass::Unauthorized,
            DenyReason::IpBlocked | DenyReason::IpNotAllowed => DenialClass::Forbidden,
            DenyReason::RateLimitExceeded
            | DenyReason::EndpointRateLimitExceeded
            | DenyReason::QuotaExceeded => DenialClass::TooManyRequests,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors raised by key lifecycle operations and the storage adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("API key not found: {id}")]
    NotFound { id: ApiKeyId },

    #[error("API key already revoked: {id}")]
    AlreadyRevoked { id: ApiKeyId },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Hashing error: {message}")]
    Hashing { message: String },
}

impl KeyError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Expected control-flow outcomes that propagate verbatim to the caller
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            KeyError::NotFound { .. } | KeyError::AlreadyRevoked { .. } | KeyError::InvalidInput { .. }
        )
    }
}
