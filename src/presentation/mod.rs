//! Presentation Layer - HTTP integration

pub mod middleware;

pub use middleware::{AuthenticatedKey, ClientIp, require_api_key};
