//! Client IP restriction
//!
//! Patterns are exact addresses (`203.0.113.7`), CIDR blocks
//! (`10.0.0.0/8`, `2001:db8::/32`) or dotted IPv4 wildcards (`192.168.*`,
//! `10.*.0.1`). The blacklist is evaluated first and wins over the whitelist.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// Error returned for an unparseable IP pattern
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid IP pattern: {0}")]
pub struct IpPatternError(pub String);

/// A single whitelist or blacklist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPattern {
    Exact(IpAddr),
    Cidr(IpNet),
    /// IPv4 octets where `None` is `*`; a trailing `*` also covers the
    /// remaining octets
    Wildcard(Vec<Option<u8>>),
}

impl IpPattern {
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            IpPattern::Exact(addr) => addr == ip,
            IpPattern::Cidr(net) => net.contains(ip),
            IpPattern::Wildcard(segments) => {
                let IpAddr::V4(v4) = ip else {
                    return false;
                };
                let octets = v4.octets();
                let trailing_star = matches!(segments.last(), Some(None));
                if segments.len() != 4 && !trailing_star {
                    return false;
                }
                segments
                    .iter()
                    .zip(octets.iter())
                    .all(|(segment, octet)| segment.is_none_or(|s| s == *octet))
            }
        }
    }
}

impl FromStr for IpPattern {
    type Err = IpPatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = s.trim();
        if pattern.is_empty() {
            return Err(IpPatternError(s.to_string()));
        }

        if pattern.contains('*') {
            let segments = pattern
                .split('.')
                .map(|segment| match segment {
                    "*" => Ok(None),
                    octet => octet.parse::<u8>().map(Some),
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| IpPatternError(s.to_string()))?;

            if segments.is_empty() || segments.len() > 4 {
                return Err(IpPatternError(s.to_string()));
            }
            return Ok(IpPattern::Wildcard(segments));
        }

        if pattern.contains('/') {
            return pattern
                .parse::<IpNet>()
                .map(IpPattern::Cidr)
                .map_err(|_| IpPatternError(s.to_string()));
        }

        pattern
            .parse::<IpAddr>()
            .map(IpPattern::Exact)
            .map_err(|_| IpPatternError(s.to_string()))
    }
}

impl fmt::Display for IpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpPattern::Exact(addr) => write!(f, "{}", addr),
            IpPattern::Cidr(net) => write!(f, "{}", net),
            IpPattern::Wildcard(segments) => {
                let parts: Vec<String> = segments
                    .iter()
                    .map(|s| s.map_or_else(|| "*".to_string(), |o| o.to_string()))
                    .collect();
                f.write_str(&parts.join("."))
            }
        }
    }
}

/// Outcome of an IP restriction check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpDecision {
    Allowed,
    /// Matched a blacklist entry
    Blocked,
    /// Whitelist present and not matched
    NotAllowed,
}

/// Evaluate a client IP against a key's blacklist and whitelist
///
/// Empty lists impose no restriction. Unparseable stored patterns are
/// skipped with a warning. An unknown client IP never matches a pattern, so
/// it is refused whenever a whitelist is present.
pub fn evaluate(whitelist: &[String], blacklist: &[String], ip: Option<IpAddr>) -> IpDecision {
    if !blacklist.is_empty()
        && let Some(ip) = ip
        && any_match(blacklist, &ip)
    {
        return IpDecision::Blocked;
    }

    if whitelist.is_empty() {
        return IpDecision::Allowed;
    }

    match ip {
        Some(ip) if any_match(whitelist, &ip) => IpDecision::Allowed,
        _ => IpDecision::NotAllowed,
    }
}

/// Check whether an IP matches any pattern of a list
pub fn any_match(patterns: &[String], ip: &IpAddr) -> bool {
    patterns.iter().any(|raw| match raw.parse::<IpPattern>() {
        Ok(pattern) => pattern.matches(ip),
        Err(e) => {
            tracing::warn!(pattern = %raw, "Skipping {}", e);
            false
        }
    })
}
