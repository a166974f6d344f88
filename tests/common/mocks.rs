//! Collaborator mocks

use async_trait::async_trait;
use std::sync::Mutex;

use keyguard::application::{
    AnalyticsSink, AuditSink, CollaboratorError, GuardEvent, GuardOutcome, ThreatDetector,
};

/// Collects every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GuardEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<GuardOutcome> {
        self.events().into_iter().map(|e| e.outcome).collect()
    }

    pub fn last(&self) -> Option<GuardEvent> {
        self.events().pop()
    }

    fn push(&self, event: &GuardEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, event: &GuardEvent) -> Result<(), CollaboratorError> {
        self.push(event);
        Ok(())
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn track(&self, event: &GuardEvent) -> Result<(), CollaboratorError> {
        self.push(event);
        Ok(())
    }
}

#[async_trait]
impl ThreatDetector for RecordingSink {
    async fn observe(&self, event: &GuardEvent) -> Result<(), CollaboratorError> {
        self.push(event);
        Ok(())
    }
}

/// Fails every call
#[derive(Default)]
pub struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn record(&self, _event: &GuardEvent) -> Result<(), CollaboratorError> {
        Err(CollaboratorError("audit store unavailable".to_string()))
    }
}

#[async_trait]
impl AnalyticsSink for FailingSink {
    async fn track(&self, _event: &GuardEvent) -> Result<(), CollaboratorError> {
        Err(CollaboratorError("analytics unavailable".to_string()))
    }
}

#[async_trait]
impl ThreatDetector for FailingSink {
    async fn observe(&self, _event: &GuardEvent) -> Result<(), CollaboratorError> {
        Err(CollaboratorError("detector unavailable".to_string()))
    }
}

/// Panics on every call
#[derive(Default)]
pub struct PanickingSink;

#[async_trait]
impl AuditSink for PanickingSink {
    async fn record(&self, _event: &GuardEvent) -> Result<(), CollaboratorError> {
        panic!("audit sink bug");
    }
}
