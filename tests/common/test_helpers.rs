//! Guard harness over in-memory backends

use std::sync::Arc;

use keyguard::application::guard::{GuardDecision, GuardRequest};
use keyguard::application::{ApiKeyGuard, ApiKeyService, AuditSink, CreateApiKeyRequest};
use keyguard::domain::auth::ApiKeyRecord;
use keyguard::domain::clock::ManualClock;
use keyguard::infrastructure::{DistributedStore, InMemoryApiKeyRepository, InMemoryStore};
use keyguard::{Config, GuardHandle, GuardOptions, create_guard_with};

use super::factories::{distributed_config, start_instant, test_config};
use super::mocks::RecordingSink;

/// Builder for [`TestHarness`]
pub struct HarnessBuilder {
    config: Config,
    distributed: bool,
    audit: Option<Arc<dyn AuditSink>>,
}

impl HarnessBuilder {
    pub fn local() -> Self {
        Self {
            config: test_config(),
            distributed: false,
            audit: None,
        }
    }

    /// Components backed by an in-memory distributed store
    pub fn distributed() -> Self {
        Self {
            config: distributed_config(),
            distributed: true,
            audit: None,
        }
    }

    pub fn configure(mut self, apply: impl FnOnce(&mut Config)) -> Self {
        apply(&mut self.config);
        self
    }

    /// Replace the recording audit sink
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn build(self) -> TestHarness {
        let clock = Arc::new(ManualClock::new(start_instant()));
        let repository = Arc::new(InMemoryApiKeyRepository::with_clock(clock.clone()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let events = Arc::new(RecordingSink::new());

        let options = GuardOptions {
            store: self
                .distributed
                .then(|| store.clone() as Arc<dyn DistributedStore>),
            clock: clock.clone(),
            audit: Some(self.audit.unwrap_or_else(|| events.clone() as Arc<dyn AuditSink>)),
            analytics: Some(events.clone()),
            threat_detector: None,
        };

        let handle = create_guard_with(self.config, repository.clone(), options)
            .await
            .expect("guard setup failed");

        TestHarness {
            handle,
            repository,
            store,
            clock,
            events,
        }
    }
}

pub struct TestHarness {
    pub handle: GuardHandle,
    pub repository: Arc<InMemoryApiKeyRepository>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    /// Receives analytics, and audit unless replaced
    pub events: Arc<RecordingSink>,
}

impl TestHarness {
    pub fn guard(&self) -> &Arc<ApiKeyGuard> {
        &self.handle.guard
    }

    pub fn keys(&self) -> &Arc<ApiKeyService> {
        &self.handle.keys
    }

    pub async fn create_key(&self, request: CreateApiKeyRequest) -> (String, ApiKeyRecord) {
        self.keys().create(request).await.expect("key creation failed")
    }

    /// Validate and wait for the queued side effects to finish
    pub async fn validate(&self, request: &GuardRequest) -> GuardDecision {
        let decision = self.guard().validate(request).await;
        self.settle().await;
        decision
    }

    pub async fn settle(&self) {
        self.guard().queue().idle().await;
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}
