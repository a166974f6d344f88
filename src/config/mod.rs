//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub token: TokenConfig,
    pub transport: TransportConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub quota: QuotaConfig,
    pub store: StoreConfig,
    pub background: BackgroundConfig,
    pub logging: LoggingConfig,
}

/// Hash algorithm used for newly issued keys
///
/// Verification does not depend on this setting: stored hashes identify
/// their own algorithm, so keys hashed under a previous setting keep working.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// Memory-hard Argon2id (OWASP-recommended)
    #[default]
    Argon2id,
    /// Work-factor salted bcrypt
    Bcrypt,
}

/// Token generation and hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Random bytes per token (hex-encoded, so the token is twice as long)
    pub byte_length: usize,
    pub hash_algorithm: HashAlgorithm,
    /// Argon2 memory cost in KiB
    pub argon2_memory_cost_kib: u32,
    /// Argon2 iterations
    pub argon2_time_cost: u32,
    pub argon2_parallelism: u32,
    /// bcrypt work factor (log2 rounds)
    pub bcrypt_cost: u32,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            byte_length: 32,
            hash_algorithm: HashAlgorithm::Argon2id,
            argon2_memory_cost_kib: 19_456, // OWASP minimum: 19 MiB
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            bcrypt_cost: 10,
        }
    }
}

/// Where the guard looks for the presented token, in precedence order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub header_name: String,
    pub query_param: String,
    pub cookie_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            header_name: "x-api-key".to_string(),
            query_param: "api_key".to_string(),
            cookie_name: "api_key".to_string(),
        }
    }
}

/// Storage backend for caches and counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Use Dragonfly/Redis, falling back to memory when unreachable (recommended for production)
    #[default]
    Dragonfly,
    /// Use in-memory storage (suitable for development/single instance)
    Memory,
}

/// Key cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: StorageBackend,
    /// Staleness bound for cached key records
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: StorageBackend::Dragonfly,
            ttl_seconds: 300, // 5 minutes
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Route-scoped request limit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointRateLimitRule {
    /// Route the rule applies to (e.g. "POST /v1/reports")
    pub route: String,
    pub max: u32,
    pub window_ms: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Storage backend for rate limit counters
    pub storage_backend: StorageBackend,
    /// Limit applied to keys without their own override (None = only keys with an override are limited)
    pub default_max: Option<u32>,
    pub default_window_ms: u64,
    /// Endpoint-specific limits, counted per (key, route)
    pub endpoint_rules: Vec<EndpointRateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_backend: StorageBackend::Dragonfly,
            default_max: None,
            default_window_ms: 60_000,
            endpoint_rules: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Endpoint rule declared for a route, if any
    pub fn endpoint_rule(&self, route: &str) -> Option<&EndpointRateLimitRule> {
        self.endpoint_rules.iter().find(|rule| rule.route == route)
    }
}

/// Quota tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub enabled: bool,
    pub storage_backend: StorageBackend,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_backend: StorageBackend::Dragonfly,
        }
    }
}

/// Distributed store (Dragonfly/Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL (e.g. "redis://127.0.0.1:6379"); None runs in pure local mode
    pub url: Option<String>,
    /// Namespace prepended to every key written to the store
    pub key_namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_namespace: "keyguard".to_string(),
        }
    }
}

/// Best-effort side-effect queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub queue_capacity: usize,
    /// How often finished local rate-limit windows are swept
    pub cleanup_interval_seconds: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            cleanup_interval_seconds: 60,
        }
    }
}

impl BackgroundConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.token.validate()?;
        self.transport.validate()?;
        self.cache.validate()?;
        self.rate_limit.validate()?;
        self.store.validate()?;
        if self.background.queue_capacity == 0 {
            return Err(ValidationError::background(
                "Background queue capacity must be greater than 0",
            ));
        }
        if self.background.cleanup_interval_seconds == 0 {
            return Err(ValidationError::background(
                "Cleanup interval must be greater than 0",
            ));
        }
        self.logging.validate()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        // Add local config and environment variables last (highest priority)
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("KEYGUARD").separator("__"));

        let mut config: Config = builder.build()?.try_deserialize()?;

        // REDIS_URL is the common convention for the store location
        if config.store.url.is_none()
            && let Ok(url) = std::env::var("REDIS_URL")
        {
            config.store.url = Some(url);
        }

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.header_name, "x-api-key");
        assert_eq!(config.transport.query_param, "api_key");
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.token.byte_length, 32);
    }

    #[test]
    fn test_endpoint_rule_lookup() {
        let config = RateLimitConfig {
            endpoint_rules: vec![EndpointRateLimitRule {
                route: "POST /v1/reports".to_string(),
                max: 5,
                window_ms: 60_000,
            }],
            ..Default::default()
        };

        assert_eq!(config.endpoint_rule("POST /v1/reports").map(|r| r.max), Some(5));
        assert!(config.endpoint_rule("GET /v1/reports").is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = serde_json::json!({
            "token": { "hash_algorithm": "bcrypt", "bcrypt_cost": 4 },
            "rate_limit": { "default_max": 100, "storage_backend": "memory" }
        });
        let config: Config = serde_json::from_value(json).unwrap();

        assert_eq!(config.token.hash_algorithm, HashAlgorithm::Bcrypt);
        assert_eq!(config.token.byte_length, 32);
        assert_eq!(config.rate_limit.default_max, Some(100));
        assert_eq!(config.rate_limit.storage_backend, StorageBackend::Memory);
        assert!(config.cache.enabled);
    }
}
