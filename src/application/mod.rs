//! Application Layer - Use cases and application services
//!
//! The request-time guard, key lifecycle use cases, the best-effort queue
//! that carries side effects off the request path, and the collaborator
//! interfaces notified of every decision.

pub mod background;
pub mod collaborators;
pub mod guard;
pub mod keys;

pub use background::BestEffortQueue;
pub use collaborators::{
    AnalyticsSink, AuditSink, CollaboratorError, GuardEvent, GuardOutcome, ThreatDetector,
    TracingAuditSink,
};
pub use guard::{Admission, ApiKeyGuard, GuardCapabilities, GuardDecision, GuardRejection, GuardRequest};
pub use keys::{ApiKeyService, CreateApiKeyRequest};
