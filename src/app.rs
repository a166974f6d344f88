//! Guard setup and wiring

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::background::{BestEffortQueue, spawn_limiter_cleanup_worker};
use crate::application::collaborators::{AnalyticsSink, AuditSink, ThreatDetector, TracingAuditSink};
use crate::application::guard::{ApiKeyGuard, GuardCapabilities};
use crate::application::keys::ApiKeyService;
use crate::config::{Config, StorageBackend, Validate, ValidationError};
use crate::domain::auth::{IApiKeyRepository, KeyError};
use crate::domain::clock::{Clock, SystemClock};
use crate::infrastructure::auth::TokenCodec;
use crate::infrastructure::cache::{DistributedKeyCache, KeyCache, LocalKeyCache};
use crate::infrastructure::quota::{DistributedQuotaTracker, LocalQuotaTracker, QuotaTracker};
use crate::infrastructure::rate_limiter::{
    DistributedRateLimiter, EndpointRateLimiter, LocalRateLimiter, RateLimiter,
};
use crate::infrastructure::store::{DistributedStore, DragonflyStore};

/// Handle returned from [`create_guard`] for use and shutdown coordination
pub struct GuardHandle {
    pub guard: Arc<ApiKeyGuard>,
    /// Lifecycle operations sharing the guard's cache and limiters
    pub keys: Arc<ApiKeyService>,
    pub shutdown_token: CancellationToken,
}

impl GuardHandle {
    /// Stop background workers; queued side effects still run
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

/// Errors raised while building a guard
#[derive(Debug, thiserror::Error)]
pub enum GuardSetupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Token codec setup failed: {0}")]
    Codec(#[from] KeyError),
}

/// Dependencies that are not read from configuration
pub struct GuardOptions {
    /// Store to use instead of connecting to `store.url`
    pub store: Option<Arc<dyn DistributedStore>>,
    pub clock: Arc<dyn Clock>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub analytics: Option<Arc<dyn AnalyticsSink>>,
    pub threat_detector: Option<Arc<dyn ThreatDetector>>,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            audit: Some(Arc::new(TracingAuditSink)),
            analytics: None,
            threat_detector: None,
        }
    }
}

/// Build a guard from configuration
pub async fn create_guard(
    config: Config,
    repository: Arc<dyn IApiKeyRepository>,
) -> Result<GuardHandle, GuardSetupError> {
    create_guard_with(config, repository, GuardOptions::default()).await
}

/// Build a guard from configuration and explicit dependencies
///
/// Each component runs its distributed variant when its backend is
/// `dragonfly` and a store is available, and its local variant otherwise.
/// An unreachable store at startup degrades every component to local mode
/// instead of failing.
pub async fn create_guard_with(
    config: Config,
    repository: Arc<dyn IApiKeyRepository>,
    options: GuardOptions,
) -> Result<GuardHandle, GuardSetupError> {
    config.validate()?;

    let config = Arc::new(config);
    let clock = options.clock;
    let shutdown_token = CancellationToken::new();
    let codec = Arc::new(TokenCodec::new(&config.token)?);
    let namespace = config.store.key_namespace.clone();

    let store = match options.store {
        Some(store) => Some(store),
        None => connect_store(&config).await,
    };
    let distributed = |backend: StorageBackend| match backend {
        StorageBackend::Dragonfly => store.clone(),
        StorageBackend::Memory => None,
    };

    // Cache
    let cache: Option<Arc<dyn KeyCache>> = if config.cache.enabled {
        let local = Arc::new(LocalKeyCache::with_clock(config.cache.ttl(), clock.clone()));
        match distributed(config.cache.backend) {
            Some(store) => {
                info!("Key cache: distributed with local fallback");
                Some(Arc::new(DistributedKeyCache::new(store, local, namespace.clone())))
            }
            None => {
                info!("Key cache: local");
                Some(local)
            }
        }
    } else {
        info!("Key cache disabled");
        None
    };

    // Rate limiting; one limiter counts both key and endpoint windows
    let (rate_limiter, endpoint_limiter) = if config.rate_limit.enabled {
        let local = Arc::new(LocalRateLimiter::with_clock(clock.clone()));
        spawn_limiter_cleanup_worker(
            local.clone(),
            config.background.cleanup_interval(),
            shutdown_token.clone(),
        );

        let limiter: Arc<dyn RateLimiter> = match distributed(config.rate_limit.storage_backend) {
            Some(store) => {
                info!("Rate limiter: distributed sliding window with local fallback");
                Arc::new(DistributedRateLimiter::new(store, local, namespace.clone(), clock.clone()))
            }
            None => {
                info!("Rate limiter: local fixed window");
                local
            }
        };
        (Some(limiter.clone()), Some(EndpointRateLimiter::new(limiter)))
    } else {
        info!("Rate limiting disabled");
        (None, None)
    };

    // Quota
    let quota: Option<Arc<dyn QuotaTracker>> = if config.quota.enabled {
        let local = Arc::new(LocalQuotaTracker::with_clock(repository.clone(), clock.clone()));
        match distributed(config.quota.storage_backend) {
            Some(store) => {
                info!("Quota tracker: distributed with local fallback");
                Some(Arc::new(DistributedQuotaTracker::new(
                    store,
                    local,
                    repository.clone(),
                    namespace.clone(),
                    clock.clone(),
                )))
            }
            None => {
                info!("Quota tracker: local");
                Some(local)
            }
        }
    } else {
        info!("Quota tracking disabled");
        None
    };

    let queue = BestEffortQueue::spawn(config.background.queue_capacity, shutdown_token.clone());

    let keys = Arc::new(ApiKeyService::new(
        repository.clone(),
        codec.clone(),
        cache.clone(),
        rate_limiter.clone(),
        clock.clone(),
    ));

    let capabilities = GuardCapabilities {
        cache,
        rate_limiter,
        endpoint_limiter,
        quota,
        audit: options.audit,
        analytics: options.analytics,
        threat_detector: options.threat_detector,
    };

    let guard = Arc::new(ApiKeyGuard::new(
        config,
        repository,
        codec,
        capabilities,
        queue,
        clock,
    ));

    Ok(GuardHandle {
        guard,
        keys,
        shutdown_token,
    })
}

async fn connect_store(config: &Config) -> Option<Arc<dyn DistributedStore>> {
    let url = config.store.url.as_deref()?;

    match DragonflyStore::connect(url).await {
        Ok(store) => {
            info!("Connected to Dragonfly DB");
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to Dragonfly DB, running in local mode");
            None
        }
    }
}
