//! External collaborators notified of guard outcomes
//!
//! Audit persistence, analytics aggregation and threat detection live
//! outside this crate. They receive a [`GuardEvent`] per validated request
//! and can never influence the admit/deny decision: they run on the
//! best-effort queue and their failures are only logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::auth::{ApiKeyId, DenyReason};

/// Final outcome of one validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOutcome {
    Admitted,
    Denied,
    /// Internal failure, distinct from a policy denial
    Failed,
}

/// What collaborators learn about a validated request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardEvent {
    pub outcome: GuardOutcome,
    /// Resolved key, absent when the token never matched a record
    pub key_id: Option<ApiKeyId>,
    pub ip: Option<IpAddr>,
    pub method: String,
    pub path: String,
    pub correlation_id: Uuid,
    /// Machine-readable denial code
    pub reason: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

impl GuardEvent {
    pub fn deny_reason_is(&self, reason: DenyReason) -> bool {
        self.reason == Some(reason.code())
    }
}

/// Collaborator failure; logged by the caller and otherwise ignored
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &GuardEvent) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn track(&self, event: &GuardEvent) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait ThreatDetector: Send + Sync {
    async fn observe(&self, event: &GuardEvent) -> Result<(), CollaboratorError>;
}

/// Audit sink writing each event to the `keyguard::audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &GuardEvent) -> Result<(), CollaboratorError> {
        let key_id = event.key_id.map(|id| id.to_string());
        let ip = event.ip.map(|ip| ip.to_string());
        tracing::info!(
            target: "keyguard::audit",
            outcome = ?event.outcome,
            key_id = key_id.as_deref(),
            ip = ip.as_deref(),
            method = %event.method,
            path = %event.path,
            correlation_id = %event.correlation_id,
            reason = event.reason,
            "API key validation"
        );
        Ok(())
    }
}
