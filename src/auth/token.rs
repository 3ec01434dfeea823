// Session token generation and hashing

use hex;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::core::errors::AegisError;

const TOKEN_BYTES: usize = 32;

/// SHA-256 hash of a session token (64-character hex string).
///
/// Only the hash is persisted, so a database leak does not expose
/// usable tokens. The hash is deterministic: lookup is a plain equality
/// match on an indexed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn from_token(token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps an existing hash string, validating shape (64 hex chars).
    pub fn from_hash_string(hash_str: &str) -> Result<Self, AegisError> {
        if hash_str.len() != 64 || !hash_str.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AegisError::Internal(
                "Invalid token hash format: expected 64 hex characters".to_string(),
            ));
        }
        Ok(Self(hash_str.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque bearer token handed to clients at login.
///
/// Wrapped in `secrecy::Secret` so it cannot leak through Debug or
/// Display formatting.
pub struct SessionToken(Secret<String>);

impl SessionToken {
    /// Generates a fresh random token (32 bytes, hex-encoded).
    pub fn generate() -> Result<Self, AegisError> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; TOKEN_BYTES];
        rng.fill(&mut bytes)
            .map_err(|_| AegisError::Internal("Random generator failure".to_string()))?;
        Ok(Self(Secret::new(hex::encode(bytes))))
    }

    pub fn new(token: &str) -> Self {
        Self(Secret::new(token.to_string()))
    }

    pub fn hash(&self) -> TokenHash {
        TokenHash::from_token(self.expose_secret())
    }

    /// Expose the raw token (login response only).
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hash_deterministic() {
        let hash1 = TokenHash::from_token("token_123");
        let hash2 = TokenHash::from_token("token_123");
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, TokenHash::from_token("token_456"));
    }

    #[test]
    fn test_token_hash_length() {
        assert_eq!(TokenHash::from_token("anything").as_str().len(), 64);
    }

    #[test]
    fn test_generated_tokens_unique() {
        let a = SessionToken::generate().unwrap();
        let b = SessionToken::generate().unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
        assert_eq!(a.expose_secret().len(), TOKEN_BYTES * 2);
    }

    #[test]
    fn test_token_redaction() {
        let token = SessionToken::new("super_secret_token");
        assert!(!format!("{:?}", token).contains("super_secret_token"));
        assert!(!format!("{}", token).contains("super_secret_token"));
    }

    #[test]
    fn test_hash_string_validation() {
        let valid = TokenHash::from_token("t");
        assert!(TokenHash::from_hash_string(valid.as_str()).is_ok());
        assert!(TokenHash::from_hash_string("short").is_err());
        assert!(TokenHash::from_hash_string(&"z".repeat(64)).is_err());
    }
}
