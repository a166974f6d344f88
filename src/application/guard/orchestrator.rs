//! Request-time validation pipeline
//!
//! A request moves through extract, lookup, verify, state, IP, rate,
//! endpoint rate and quota checks, stopping at the first gate that denies.
//! Headers of every limiter check that ran are returned with the decision,
//! whether it admits or denies. Usage bookkeeping and collaborator
//! notifications are queued on the best-effort queue and never delay or
//! change the decision.

use axum::http::HeaderMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::decision::{
    Admission, GuardDecision, GuardRejection, RejectionKind, apply_endpoint_rate_limit_headers,
    apply_quota_headers, apply_rate_limit_headers,
};
use super::request::{EndpointLimit, GuardRequest};
use crate::application::background::BestEffortQueue;
use crate::application::collaborators::{
    AnalyticsSink, AuditSink, GuardEvent, GuardOutcome, ThreatDetector,
};
use crate::config::Config;
use crate::domain::auth::{ApiKeyId, ApiKeyRecord, DenyReason, IApiKeyRepository, KeyError, KeyPrefix};
use crate::domain::clock::Clock;
use crate::infrastructure::auth::TokenCodec;
use crate::infrastructure::auth::ip_filter::{self, IpDecision};
use crate::infrastructure::cache::KeyCache;
use crate::infrastructure::quota::QuotaTracker;
use crate::infrastructure::rate_limiter::{EndpointRateLimiter, RateLimitKey, RateLimiter};

/// Optional capabilities of a guard
///
/// An absent capability skips its check or side effect entirely.
#[derive(Clone, Default)]
pub struct GuardCapabilities {
    pub cache: Option<Arc<dyn KeyCache>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub endpoint_limiter: Option<EndpointRateLimiter>,
    pub quota: Option<Arc<dyn QuotaTracker>>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub analytics: Option<Arc<dyn AnalyticsSink>>,
    pub threat_detector: Option<Arc<dyn ThreatDetector>>,
}

/// Why the pipeline stopped before admission
enum Stop {
    Denied {
        reason: DenyReason,
        key_id: Option<ApiKeyId>,
    },
    Internal(KeyError),
}

impl Stop {
    fn deny(reason: DenyReason) -> Self {
        Stop::Denied { reason, key_id: None }
    }

    fn deny_key(reason: DenyReason, record: &ApiKeyRecord) -> Self {
        Stop::Denied {
            reason,
            key_id: Some(record.id),
        }
    }
}

/// Validates API keys and enforces their usage policy
pub struct ApiKeyGuard {
    config: Arc<Config>,
    repository: Arc<dyn IApiKeyRepository>,
    codec: Arc<TokenCodec>,
    capabilities: GuardCapabilities,
    queue: BestEffortQueue,
    clock: Arc<dyn Clock>,
}

impl ApiKeyGuard {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn IApiKeyRepository>,
        codec: Arc<TokenCodec>,
        capabilities: GuardCapabilities,
        queue: BestEffortQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            repository,
            codec,
            capabilities,
            queue,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn IApiKeyRepository> {
        &self.repository
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn capabilities(&self) -> &GuardCapabilities {
        &self.capabilities
    }

    /// Queue carrying this guard's side effects
    pub fn queue(&self) -> &BestEffortQueue {
        &self.queue
    }

    /// Run the full pipeline for one request
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn validate(&self, request: &GuardRequest) -> GuardDecision {
        let correlation_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();

        match self.evaluate(request, &mut headers).await {
            Ok(record) => {
                debug!(key_id = %record.id, %correlation_id, "API key admitted");
                self.record_usage(&record);
                self.notify(request, GuardOutcome::Admitted, Some(record.id), None, correlation_id);
                Ok(Admission {
                    record,
                    headers,
                    correlation_id,
                })
            }
            Err(Stop::Denied { reason, key_id }) => {
                debug!(
                    key_id = key_id.map(|id| id.to_string()),
                    reason = reason.code(),
                    %correlation_id,
                    "API key denied"
                );
                self.notify(request, GuardOutcome::Denied, key_id, Some(reason), correlation_id);
                Err(GuardRejection {
                    kind: RejectionKind::Denied(reason),
                    headers,
                    correlation_id,
                })
            }
            Err(Stop::Internal(e)) => {
                error!(error = %e, %correlation_id, "API key validation failed");
                self.notify(request, GuardOutcome::Failed, None, None, correlation_id);
                Err(GuardRejection {
                    kind: RejectionKind::Internal,
                    headers,
                    correlation_id,
                })
            }
        }
    }

    async fn evaluate(&self, request: &GuardRequest, headers: &mut HeaderMap) -> Result<ApiKeyRecord, Stop> {
        let token = request
            .extract_token(&self.config.transport)
            .ok_or(Stop::deny(DenyReason::MissingApiKey))?;

        // Short tokens never reach the cache, the index or the hasher
        let Some(prefix) = TokenCodec::prefix(&token) else {
            debug!(token = %TokenCodec::mask(&token), "API key shorter than its prefix");
            return Err(Stop::deny(DenyReason::InvalidApiKey));
        };

        let record = self.resolve(&token, &prefix).await?;

        if record.is_revoked() {
            return Err(Stop::deny_key(DenyReason::ApiKeyRevoked, &record));
        }
        if record.is_expired_at(self.clock.now()) {
            return Err(Stop::deny_key(DenyReason::ApiKeyExpired, &record));
        }

        match ip_filter::evaluate(&record.ip_whitelist, &record.ip_blacklist, request.ip) {
            IpDecision::Allowed => {}
            IpDecision::Blocked => return Err(Stop::deny_key(DenyReason::IpBlocked, &record)),
            IpDecision::NotAllowed => return Err(Stop::deny_key(DenyReason::IpNotAllowed, &record)),
        }

        self.check_rate_limit(&record, headers).await?;
        self.check_endpoint_rate_limit(&record, request, headers).await?;
        self.check_quota(&record, headers).await?;

        Ok(record)
    }

    /// Find the record whose hash matches the token
    ///
    /// The key index is only consulted on a cache miss; a cached shard with
    /// no matching candidate is a denial.
    async fn resolve(&self, token: &str, prefix: &KeyPrefix) -> Result<ApiKeyRecord, Stop> {
        if let Some(cache) = &self.capabilities.cache {
            let cached = cache.get_by_prefix(prefix).await;
            if !cached.is_empty() {
                return match self.first_match(token, cached).await {
                    Some(record) => Ok(record),
                    None => {
                        debug!(
                            %prefix,
                            fingerprint = %TokenCodec::fingerprint(token),
                            "No cached candidate matched"
                        );
                        Err(Stop::deny(DenyReason::InvalidApiKey))
                    }
                };
            }
        }

        let candidates = self
            .repository
            .find_by_key_prefix(prefix)
            .await
            .map_err(Stop::Internal)?;

        if let Some(cache) = &self.capabilities.cache {
            if !candidates.is_empty() {
                cache.set_many(&candidates, Some(self.config.cache.ttl())).await;
            }
        }

        match self.first_match(token, candidates).await {
            Some(record) => Ok(record),
            None => {
                debug!(
                    %prefix,
                    fingerprint = %TokenCodec::fingerprint(token),
                    "No indexed key matched"
                );
                Err(Stop::deny(DenyReason::InvalidApiKey))
            }
        }
    }

    async fn first_match(&self, token: &str, candidates: Vec<ApiKeyRecord>) -> Option<ApiKeyRecord> {
        for candidate in candidates {
            if self.codec.verify(token, &candidate.hashed_key).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn check_rate_limit(&self, record: &ApiKeyRecord, headers: &mut HeaderMap) -> Result<(), Stop> {
        let settings = &self.config.rate_limit;
        if !settings.enabled {
            return Ok(());
        }
        let Some(limiter) = &self.capabilities.rate_limiter else {
            return Ok(());
        };
        let Some(max) = record.rate_limit_max.or(settings.default_max) else {
            return Ok(());
        };
        let window_ms = record.rate_limit_window_ms.unwrap_or(settings.default_window_ms);

        let result = limiter.check(&RateLimitKey::ApiKey(record.id), max, window_ms).await;
        apply_rate_limit_headers(headers, &result);

        if result.allowed {
            Ok(())
        } else {
            Err(Stop::deny_key(DenyReason::RateLimitExceeded, record))
        }
    }

    async fn check_endpoint_rate_limit(
        &self,
        record: &ApiKeyRecord,
        request: &GuardRequest,
        headers: &mut HeaderMap,
    ) -> Result<(), Stop> {
        if !self.config.rate_limit.enabled {
            return Ok(());
        }
        let Some(limiter) = &self.capabilities.endpoint_limiter else {
            return Ok(());
        };
        let limit = request.endpoint_limit.or_else(|| {
            self.config
                .rate_limit
                .endpoint_rule(&request.route)
                .map(|rule| EndpointLimit {
                    max: rule.max,
                    window_ms: rule.window_ms,
                })
        });
        let Some(limit) = limit else {
            return Ok(());
        };

        let result = limiter
            .check(&record.id, &request.route, limit.max, limit.window_ms)
            .await;
        apply_endpoint_rate_limit_headers(headers, &result);

        if result.allowed {
            Ok(())
        } else {
            Err(Stop::deny_key(DenyReason::EndpointRateLimitExceeded, record))
        }
    }

    async fn check_quota(&self, record: &ApiKeyRecord, headers: &mut HeaderMap) -> Result<(), Stop> {
        let Some(quota) = &self.capabilities.quota else {
            return Ok(());
        };
        if record.quota_policy().is_none() {
            return Ok(());
        }

        let status = quota.check_quota(record).await;
        apply_quota_headers(headers, &status);

        if status.allowed {
            Ok(())
        } else {
            Err(Stop::deny_key(DenyReason::QuotaExceeded, record))
        }
    }

    /// Queue the bookkeeping that follows an admission
    fn record_usage(&self, record: &ApiKeyRecord) {
        let id = record.id;

        let repository = self.repository.clone();
        let now = self.clock.now();
        self.queue.submit("update_last_used", async move {
            repository.update_last_used(&id, now).await.map(|_| ())
        });

        if let (Some(quota), Some((max, period))) = (&self.capabilities.quota, record.quota_policy()) {
            let quota = quota.clone();
            self.queue.submit("increment_quota", async move {
                quota.increment_usage(&id, max, period).await;
                Ok::<(), Infallible>(())
            });
        }
    }

    fn notify(
        &self,
        request: &GuardRequest,
        outcome: GuardOutcome,
        key_id: Option<ApiKeyId>,
        reason: Option<DenyReason>,
        correlation_id: Uuid,
    ) {
        let event = GuardEvent {
            outcome,
            key_id,
            ip: request.ip,
            method: request.method.to_string(),
            path: request.path.clone(),
            correlation_id,
            reason: reason.map(|r| r.code()),
            timestamp: self.clock.now(),
        };

        if let Some(audit) = &self.capabilities.audit {
            let audit = audit.clone();
            let event = event.clone();
            self.queue.submit("audit", async move { audit.record(&event).await });
        }
        if let Some(analytics) = &self.capabilities.analytics {
            let analytics = analytics.clone();
            let event = event.clone();
            self.queue.submit("analytics", async move { analytics.track(&event).await });
        }
        if let Some(detector) = &self.capabilities.threat_detector {
            let detector = detector.clone();
            self.queue
                .submit("threat_detection", async move { detector.observe(&event).await });
        }
    }
}
