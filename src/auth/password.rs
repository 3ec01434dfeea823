// Password hashing (PBKDF2-HMAC-SHA256)

use hex;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

use crate::core::errors::AegisError;

const ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
const ITERATIONS: u32 = 600_000;
const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Hashes a password into the stored encoding:
/// `pbkdf2_sha256$<iterations>$<salt_hex>$<hash_hex>`.
pub fn hash_password(password: &str) -> Result<String, AegisError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_BYTES];
    rng.fill(&mut salt)
        .map_err(|_| AegisError::Internal("Random generator failure".to_string()))?;

    let iterations = NonZeroU32::new(ITERATIONS)
        .ok_or_else(|| AegisError::Internal("Invalid iteration count".to_string()))?;
    let mut hash = [0u8; HASH_BYTES];
    pbkdf2::derive(ALGORITHM, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "pbkdf2_sha256${}${}${}",
        ITERATIONS,
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Verifies a password against a stored encoding. A malformed encoding
/// verifies as false rather than erroring, so login cannot leak which
/// accounts have corrupt records.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt_hex), Some(hash_hex), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != "pbkdf2_sha256" {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Some(iterations) = NonZeroU32::new(iterations) else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(hash_hex) else {
        return false;
    };

    pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &expected).is_ok()
}

/// Basic strength check applied on account creation and password change.
pub fn validate_password_strength(password: &str) -> Result<(), AegisError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AegisError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let encoded = hash_password("correct horse battery staple").unwrap();
        assert!(encoded.starts_with("pbkdf2_sha256$"));
        assert!(verify_password("correct horse battery staple", &encoded));
        assert!(!verify_password("wrong password", &encoded));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_encodings_never_verify() {
        assert!(!verify_password("pw", ""));
        assert!(!verify_password("pw", "plaintext"));
        assert!(!verify_password("pw", "pbkdf2_sha256$notanumber$aa$bb"));
        assert!(!verify_password("pw", "md5$1000$aa$bb"));
        assert!(!verify_password("pw", "pbkdf2_sha256$0$aa$bb"));
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("long enough password").is_ok());
    }
}
