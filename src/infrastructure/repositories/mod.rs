//! Storage adapter implementations

pub mod memory;

pub use memory::InMemoryApiKeyRepository;
