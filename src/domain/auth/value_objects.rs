//! API key value objects

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// API key ID value object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(pub Uuid);

impl ApiKeyId {
    /// Create a new ApiKeyId from UUID
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a new random ApiKeyId
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ApiKeyId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ApiKeyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public lookup prefix of a token (first 8 characters)
///
/// Never secret-bearing: it only shards lookups so that a presented token is
/// verified against a handful of candidates instead of every stored hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    /// Number of token characters that form the prefix
    pub const LENGTH: usize = 8;

    /// Derive the prefix of a token, `None` if the token is too short
    pub fn of(token: &str) -> Option<Self> {
        let prefix: String = token.chars().take(Self::LENGTH).collect();
        (prefix.chars().count() == Self::LENGTH).then_some(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for KeyPrefix {
    fn from(prefix: String) -> Self {
        Self(prefix)
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashed API key value object
///
/// Stored in PHC/modular-crypt form, so the string identifies its own
/// algorithm (`$argon2id$...`, `$2b$...`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashedKey(String);

impl HashedKey {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HashedKey {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

/// Derived lifecycle state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Active,
    Expired,
    Revoked,
}

impl KeyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyState::Active => "active",
            KeyState::Expired => "expired",
            KeyState::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar period a quota is measured over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPeriod {
    Daily,
    Monthly,
    Yearly,
}

impl QuotaPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaPeriod::Daily => "daily",
            QuotaPeriod::Monthly => "monthly",
            QuotaPeriod::Yearly => "yearly",
        }
    }

    /// Start of the next period after `now` (UTC calendar boundaries)
    ///
    /// daily → next midnight, monthly → first of next month,
    /// yearly → January 1st of next year.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let next = match self {
            QuotaPeriod::Daily => today.succ_opt(),
            QuotaPeriod::Monthly => {
                if today.month() == 12 {
                    NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
                }
            }
            QuotaPeriod::Yearly => NaiveDate::from_ymd_opt(today.year() + 1, 1, 1),
        };

        // Only fails at the end of chrono's representable range
        next.and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl FromStr for QuotaPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(QuotaPeriod::Daily),
            "monthly" => Ok(QuotaPeriod::Monthly),
            "yearly" => Ok(QuotaPeriod::Yearly),
            other => Err(format!("Unknown quota period: {}", other)),
        }
    }
}

impl fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
