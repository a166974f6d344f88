//! Keyguard - API key validation and throttling engine
//!
//! Authenticates requests against opaque API keys and enforces per-key usage
//! policy before a request proceeds:
//!
//! # Modules
//!
//! - [`config`] - Strongly-typed configuration with TOML and environment variable support
//! - [`domain`] - Key records, value objects, errors, the storage adapter trait and the clock
//! - [`application`] - The request-time guard, key lifecycle use cases and the best-effort queue
//! - [`infrastructure`] - Token codec, key caches, rate limiters, quota trackers and store clients
//! - [`presentation`] - Axum middleware and extractor
//! - [`logging`] - Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/           # Pure types and interfaces
//! ├── application/      # Guard pipeline, key lifecycle, background work
//! ├── infrastructure/
//! │   ├── auth/         # Token codec, IP pattern matching
//! │   ├── cache/        # Local and Dragonfly-backed key caches
//! │   ├── rate_limiter/ # Fixed window (local), sliding window (Dragonfly)
//! │   ├── quota/        # Calendar-period quota counters
//! │   ├── store/        # Dragonfly/Redis client and in-memory store
//! │   └── repositories/ # In-memory storage adapter
//! ├── presentation/     # Axum integration
//! └── config/           # Configuration management
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use keyguard::{Config, create_guard};
//! use keyguard::application::CreateApiKeyRequest;
//!
//! let config = Config::load()?;
//! let handle = create_guard(config, repository).await?;
//!
//! let (token, record) = handle.keys.create(CreateApiKeyRequest::new("ci")).await?;
//!
//! let app = Router::new()
//!     .route("/v1/reports", get(list_reports))
//!     .route_layer(axum::middleware::from_fn_with_state(
//!         handle.guard.clone(),
//!         keyguard::presentation::require_api_key,
//!     ));
//! ```
//!
//! Environment variables use the `KEYGUARD__` prefix with double underscore separators:
//!
//! ```bash
//! KEYGUARD__STORE__URL=redis://127.0.0.1:6379
//! KEYGUARD__RATE_LIMIT__DEFAULT_MAX=100
//! ```

mod app;

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;
pub mod presentation;

pub use app::{GuardHandle, GuardOptions, GuardSetupError, create_guard, create_guard_with};
pub use config::Config;
pub use logging::init_tracing;
