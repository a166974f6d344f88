//! Domain Layer - Core business logic and entities
//!
//! API key records, their value objects and errors, the storage adapter
//! trait, and the clock every time-dependent component reads.

pub mod auth;
pub mod clock;

pub use auth::*;
pub use clock::{Clock, ManualClock, SystemClock};
