//! Test data factories

use axum::http::Method;
use chrono::{DateTime, TimeZone, Utc};
use std::net::IpAddr;

use keyguard::Config;
use keyguard::application::CreateApiKeyRequest;
use keyguard::application::guard::GuardRequest;
use keyguard::config::{StorageBackend, TokenConfig};

/// Fixed start instant for manual clocks: Thursday, mid-afternoon UTC
pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 15, 0, 0).unwrap()
}

/// Configuration with cheap hashing and every component on local backends
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.token = TokenConfig {
        argon2_memory_cost_kib: 1024,
        argon2_time_cost: 1,
        bcrypt_cost: 4,
        ..Default::default()
    };
    config.cache.backend = StorageBackend::Memory;
    config.rate_limit.storage_backend = StorageBackend::Memory;
    config.quota.storage_backend = StorageBackend::Memory;
    config.logging.format = "compact".to_string();
    config
}

/// Same as [`test_config`] with every component on the distributed store
pub fn distributed_config() -> Config {
    let mut config = test_config();
    config.cache.backend = StorageBackend::Dragonfly;
    config.rate_limit.storage_backend = StorageBackend::Dragonfly;
    config.quota.storage_backend = StorageBackend::Dragonfly;
    config
}

pub fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

/// GET request presenting `token` in the default header
pub fn request_with_token(token: &str) -> GuardRequest {
    GuardRequest::new(Method::GET, "/v1/items")
        .with_header("x-api-key", token)
        .with_ip(ip("203.0.113.10"))
}

pub fn key_request(name: &str) -> CreateApiKeyRequest {
    CreateApiKeyRequest::new(name)
}

pub fn rate_limited_key(name: &str, max: u32, window_ms: u64) -> CreateApiKeyRequest {
    CreateApiKeyRequest {
        rate_limit_max: Some(max),
        rate_limit_window_ms: Some(window_ms),
        ..CreateApiKeyRequest::new(name)
    }
}
