//! Configuration validation module

use crate::config::{
    CacheConfig, LoggingConfig, RateLimitConfig, StorageBackend, StoreConfig, TokenConfig,
    TransportConfig,
};
use crate::infrastructure::rate_limiter::MAX_WINDOW_MS;

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Token configuration error: {message}")]
    Token { message: String },

    #[error("Transport configuration error: {message}")]
    Transport { message: String },

    #[error("Cache configuration error: {message}")]
    Cache { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },

    #[error("Store configuration error: {message}")]
    Store { message: String },

    #[error("Background queue configuration error: {message}")]
    Background { message: String },

    #[error("Logging configuration error: {message}")]
    Logging { message: String },
}

impl ValidationError {
    pub fn token(message: impl Into<String>) -> Self {
        Self::Token {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn background(message: impl Into<String>) -> Self {
        Self::Background {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

impl Validate for TokenConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 16 bytes keeps the hex token above the prefix length with entropy to spare
        if self.byte_length < 16 {
            return Err(ValidationError::token(format!(
                "Token byte length must be at least 16, got {}",
                self.byte_length
            )));
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ValidationError::token(format!(
                "bcrypt cost must be in range 4-31, got {}",
                self.bcrypt_cost
            )));
        }

        // Argon2 requires at least 8 KiB per lane
        if self.argon2_parallelism == 0
            || self.argon2_time_cost == 0
            || self.argon2_memory_cost_kib < 8 * self.argon2_parallelism
        {
            return Err(ValidationError::token(
                "Argon2 parameters must be non-zero with at least 8 KiB of memory per lane",
            ));
        }

        Ok(())
    }
}

impl Validate for TransportConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.header_name.is_empty() || self.query_param.is_empty() || self.cookie_name.is_empty() {
            return Err(ValidationError::transport(
                "Header, query parameter and cookie names cannot be empty",
            ));
        }

        if axum::http::HeaderName::from_bytes(self.header_name.as_bytes()).is_err() {
            return Err(ValidationError::transport(format!(
                "Invalid header name: {}",
                self.header_name
            )));
        }

        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.ttl_seconds == 0 {
            return Err(ValidationError::cache(
                "Cache TTL must be greater than 0 seconds",
            ));
        }

        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.default_window_ms == 0 {
            return Err(ValidationError::rate_limit(
                "Default window must be greater than 0 ms",
            ));
        }
        if self.default_window_ms > MAX_WINDOW_MS {
            return Err(ValidationError::rate_limit(format!(
                "Default window must be at most {} ms",
                MAX_WINDOW_MS
            )));
        }

        if self.default_max == Some(0) {
            return Err(ValidationError::rate_limit(
                "Default max must be greater than 0 when set",
            ));
        }

        for rule in &self.endpoint_rules {
            if rule.route.is_empty() {
                return Err(ValidationError::rate_limit("Endpoint rule route cannot be empty"));
            }
            if rule.max == 0 || rule.window_ms == 0 {
                return Err(ValidationError::rate_limit(format!(
                    "Endpoint rule for {} must have max and window_ms greater than 0",
                    rule.route
                )));
            }
            if rule.window_ms > MAX_WINDOW_MS {
                return Err(ValidationError::rate_limit(format!(
                    "Endpoint rule for {} must have window_ms at most {}",
                    rule.route, MAX_WINDOW_MS
                )));
            }
        }

        Ok(())
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.key_namespace.is_empty() {
            return Err(ValidationError::store("Key namespace cannot be empty"));
        }

        if let Some(url) = &self.url
            && !(url.starts_with("redis://") || url.starts_with("rediss://"))
        {
            return Err(ValidationError::store(format!(
                "Store URL must use the redis:// or rediss:// scheme, got {}",
                url
            )));
        }

        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.format.as_str() {
            "json" | "pretty" | "compact" => Ok(()),
            other => Err(ValidationError::logging(format!(
                "Unknown log format: {} (expected json, pretty or compact)",
                other
            ))),
        }
    }
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Dragonfly => "dragonfly",
            StorageBackend::Memory => "memory",
        }
    }
}
