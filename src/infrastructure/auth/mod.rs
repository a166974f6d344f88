//! Token and client-address primitives

pub mod ip_filter;
pub mod token_codec;

pub use ip_filter::{IpDecision, IpPattern, IpPatternError};
pub use token_codec::{HashScheme, TokenCodec};
