//! Common test utilities shared by the integration tests
//!
//! This module provides:
//! - Configuration and request factories
//! - Recording and failing collaborator mocks
//! - A harness wiring a guard to in-memory backends and a manual clock
//! - Assertions on guard decisions

#![allow(dead_code)]

pub mod assertions;
pub mod factories;
pub mod mocks;
pub mod test_helpers;

pub use assertions::*;
pub use factories::*;
pub use mocks::*;
pub use test_helpers::*;
