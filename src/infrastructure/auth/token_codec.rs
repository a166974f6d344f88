//! API key token codec
//!
//! Generates high-entropy tokens, derives their public lookup prefix, and
//! hashes/verifies secrets with Argon2id or bcrypt. Stored hashes are
//! self-describing (`$argon2id$...`, `$2b$...`), so verification detects the
//! algorithm from the hash and never needs out-of-band metadata.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash as Argon2Hash, PasswordHasher as Argon2Hasher, PasswordVerifier, SaltString,
        rand_core::OsRng,
    },
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::{HashAlgorithm, TokenConfig};
use crate::domain::auth::{HashedKey, KeyError, KeyPrefix};

/// Algorithm family a stored hash belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Argon2,
    Bcrypt,
}

impl HashScheme {
    /// Detect the algorithm from the leading identifier of a stored hash
    pub fn detect(hash: &str) -> Option<Self> {
        if hash.starts_with("$argon2") {
            Some(HashScheme::Argon2)
        } else if ["$2a$", "$2b$", "$2x$", "$2y$"]
            .iter()
            .any(|id| hash.starts_with(id))
        {
            Some(HashScheme::Bcrypt)
        } else {
            None
        }
    }
}

/// Token generation, hashing and verification service
#[derive(Clone)]
pub struct TokenCodec {
    /// Random bytes per generated token
    byte_length: usize,
    /// Algorithm used for newly issued hashes
    algorithm: HashAlgorithm,
    /// Argon2 parameters (memory cost, time cost, parallelism)
    argon2_params: Params,
    bcrypt_cost: u32,
}

impl TokenCodec {
    /// Tokens shorter than this are rejected before any hashing work
    pub const MIN_TOKEN_LENGTH: usize = KeyPrefix::LENGTH;
    /// Argon2 output hash length in bytes
    const OUTPUT_LEN: usize = 32;

    /// Create a codec from token configuration
    pub fn new(config: &TokenConfig) -> Result<Self, KeyError> {
        let argon2_params = Params::new(
            config.argon2_memory_cost_kib,
            config.argon2_time_cost,
            config.argon2_parallelism,
            Some(Self::OUTPUT_LEN),
        )
        .map_err(|e| KeyError::Hashing {
            message: format!("Invalid Argon2 parameters: {}", e),
        })?;

        Ok(Self {
            byte_length: config.byte_length,
            algorithm: config.hash_algorithm,
            argon2_params,
            bcrypt_cost: config.bcrypt_cost,
        })
    }

    /// Algorithm used for newly issued hashes
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Generate a new token with the configured byte length
    pub fn generate(&self) -> String {
        Self::generate_with_length(self.byte_length)
    }

    /// Generate a hex-encoded token from `byte_length` random bytes
    pub fn generate_with_length(byte_length: usize) -> String {
        let mut random_bytes = vec![0u8; byte_length];
        rand::rng().fill_bytes(&mut random_bytes);
        hex::encode(random_bytes)
    }

    /// Public lookup prefix of a token (first 8 characters)
    pub fn prefix(token: &str) -> Option<KeyPrefix> {
        KeyPrefix::of(token)
    }

    /// Short SHA-256 fingerprint of a token, safe to log
    pub fn fingerprint(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    /// Mask a token for display (first 4 and last 4 characters)
    pub fn mask(token: &str) -> String {
        let len = token.chars().count();
        if len <= 12 {
            return "*".repeat(len);
        }
        match (token.get(..4), token.get(token.len() - 4..)) {
            (Some(head), Some(tail)) => format!("{}...{}", head, tail),
            _ => "*".repeat(len),
        }
    }

    /// Hash a secret with the configured algorithm (non-blocking)
    ///
    /// Runs on the blocking thread pool so CPU-heavy hashing never stalls
    /// the async runtime.
    pub async fn hash(&self, secret: String) -> Result<HashedKey, KeyError> {
        let algorithm = self.algorithm;
        let params = self.argon2_params.clone();
        let cost = self.bcrypt_cost;

        tokio::task::spawn_blocking(move || match algorithm {
            HashAlgorithm::Argon2id => {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                    .hash_password(secret.as_bytes(), &salt)
                    .map(|h| h.to_string())
                    .map_err(|e| e.to_string())
            }
            HashAlgorithm::Bcrypt => bcrypt::hash(secret.as_bytes(), cost).map_err(|e| e.to_string()),
        })
        .await
        .map_err(|e| {
            tracing::error!("Token hash task panicked: {}", e);
            KeyError::Hashing {
                message: "Token hashing failed".to_string(),
            }
        })?
        .map(HashedKey::from)
        .map_err(|e| {
            tracing::error!("Failed to hash token: {}", e);
            KeyError::Hashing {
                message: "Token hashing failed".to_string(),
            }
        })
    }

    /// Verify a secret against a stored hash (non-blocking)
    ///
    /// Never fails: a malformed stored hash is logged as an internal anomaly
    /// and treated as a mismatch.
    pub async fn verify(&self, secret: &str, hashed: &HashedKey) -> bool {
        if secret.chars().count() < Self::MIN_TOKEN_LENGTH {
            return false;
        }

        let secret = secret.to_string();
        let hashed = hashed.clone();
        tokio::task::spawn_blocking(move || verify_blocking(&secret, &hashed))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Token verify task panicked: {}", e);
                false
            })
    }
}

fn verify_blocking(secret: &str, hashed: &HashedKey) -> bool {
    match HashScheme::detect(hashed.as_str()) {
        Some(HashScheme::Argon2) => match Argon2Hash::new(hashed.as_str()) {
            // Parameters are read back from the PHC string
            Ok(parsed) => Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "Stored Argon2 hash is malformed");
                false
            }
        },
        Some(HashScheme::Bcrypt) => match bcrypt::verify(secret.as_bytes(), hashed.as_str()) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, "Stored bcrypt hash is malformed");
                false
            }
        },
        None => {
            tracing::error!("Stored hash has an unrecognized algorithm identifier");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(algorithm: HashAlgorithm) -> TokenCodec {
        // Low costs keep the tests fast
        TokenCodec::new(&TokenConfig {
            hash_algorithm: algorithm,
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            bcrypt_cost: 4,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_token_generation() {
        let codec = codec(HashAlgorithm::Argon2id);
        let token1 = codec.generate();
        let token2 = codec.generate();

        assert_ne!(token1, token2);
        assert_eq!(token1.len(), 64);
        assert!(token1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_custom_length() {
        let token = TokenCodec::generate_with_length(16);
        assert_eq!(token.len(), 32);
    }

    #[test]
    fn test_prefix_is_first_eight_characters() {
        let token = TokenCodec::generate_with_length(32);
        let prefix = TokenCodec::prefix(&token).unwrap();
        assert_eq!(prefix.as_str(), &token[..8]);
    }

    #[test]
    fn test_masking() {
        let token = TokenCodec::generate_with_length(32);
        let masked = TokenCodec::mask(&token);
        assert!(masked.contains("..."));
        assert!(masked.len() < token.len());
        assert_eq!(TokenCodec::mask("short"), "*****");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(
            TokenCodec::fingerprint("abcdef0123456789"),
            TokenCodec::fingerprint("abcdef0123456789")
        );
        assert_eq!(TokenCodec::fingerprint("abcdef0123456789").len(), 16);
    }

    #[test]
    fn test_scheme_detection() {
        assert_eq!(
            HashScheme::detect("$argon2id$v=19$m=1024,t=1,p=1$abc$def"),
            Some(HashScheme::Argon2)
        );
        assert_eq!(HashScheme::detect("$2b$04$abc"), Some(HashScheme::Bcrypt));
        assert_eq!(HashScheme::detect("plaintext"), None);
    }

    #[tokio::test]
    async fn test_argon2id_round_trip() {
        let codec = codec(HashAlgorithm::Argon2id);
        let token = codec.generate();

        let hash = codec.hash(token.clone()).await.unwrap();
        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(codec.verify(&token, &hash).await);
        assert!(!codec.verify("0000000000000000", &hash).await);
    }

    #[tokio::test]
    async fn test_bcrypt_round_trip() {
        let codec = codec(HashAlgorithm::Bcrypt);
        let token = codec.generate();

        let hash = codec.hash(token.clone()).await.unwrap();
        assert!(hash.as_str().starts_with("$2"));
        assert!(codec.verify(&token, &hash).await);
        assert!(!codec.verify("0000000000000000", &hash).await);
    }

    #[tokio::test]
    async fn test_verification_is_independent_of_configured_algorithm() {
        let bcrypt_codec = codec(HashAlgorithm::Bcrypt);
        let argon_codec = codec(HashAlgorithm::Argon2id);
        let token = bcrypt_codec.generate();

        let hash = bcrypt_codec.hash(token.clone()).await.unwrap();
        assert!(argon_codec.verify(&token, &hash).await);
    }

    #[tokio::test]
    async fn test_short_tokens_rejected_even_with_matching_hash() {
        let codec = codec(HashAlgorithm::Bcrypt);
        let hash = codec.hash("abc".to_string()).await.unwrap();

        assert!(!codec.verify("abc", &hash).await);

        // Eight bytes but four characters
        let hash = codec.hash("éééé".to_string()).await.unwrap();
        assert!(!codec.verify("éééé", &hash).await);
    }

    #[tokio::test]
    async fn test_malformed_hash_is_a_mismatch() {
        let codec = codec(HashAlgorithm::Argon2id);
        let token = codec.generate();

        assert!(!codec.verify(&token, &HashedKey::new("$argon2id$garbage".to_string())).await);
        assert!(!codec.verify(&token, &HashedKey::new("$2b$nope".to_string())).await);
        assert!(!codec.verify(&token, &HashedKey::new("not-a-hash".to_string())).await);
    }
}
