//! Request-time API key guard

pub mod decision;
pub mod orchestrator;
pub mod request;

pub use decision::{Admission, ErrorResponse, GuardDecision, GuardRejection, RejectionKind};
pub use orchestrator::{ApiKeyGuard, GuardCapabilities};
pub use request::{EndpointLimit, GuardRequest};
