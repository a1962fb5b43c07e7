//! # Password Hashing
//!
//! Salted Argon2id digests stored as hex `{ salt, hash }` pairs, plus the
//! password policy applied at registration and password change.

use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::errors::{CipherError, CipherResult};

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 64;

/// Stored password digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordDigest {
    pub salt: String,
    pub hash: String,
}

/// Hash a password under a fresh random salt
pub fn hash_password(password: &str) -> CipherResult<PasswordDigest> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let hash = derive(password, &salt)?;
    Ok(PasswordDigest {
        salt: hex::encode(salt),
        hash: hex::encode(hash),
    })
}

/// Recompute the digest for `password` and compare in constant time.
///
/// Malformed stored values simply fail verification.
pub fn verify_password(password: &str, salt: &str, hash: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(hash)) else {
        return false;
    };

    match derive(password, &salt) {
        Ok(actual) => constant_time_eq(&actual, &expected),
        Err(_) => false,
    }
}

/// Constant-time comparison of two byte slices
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn derive(password: &str, salt: &[u8]) -> CipherResult<[u8; HASH_LEN]> {
    let mut out = [0u8; HASH_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|_| CipherError::HashingFailed)?;
    Ok(out)
}

/// Password requirements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default)]
    pub require_uppercase: bool,
    #[serde(default)]
    pub require_lowercase: bool,
    #[serde(default = "default_true")]
    pub require_number: bool,
    #[serde(default)]
    pub require_special: bool,
}

fn default_min_length() -> usize {
    8
}
fn default_true() -> bool {
    true
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            require_uppercase: false,
            require_lowercase: false,
            require_number: true,
            require_special: false,
        }
    }
}

impl PasswordPolicy {
    /// Check a candidate password, returning the first unmet rule
    pub fn validate(&self, password: &str) -> Result<(), String> {
        if password.chars().count() < self.min_length {
            return Err(format!(
                "Password must be at least {} characters",
                self.min_length
            ));
        }

        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            return Err("Password must contain at least one uppercase letter".to_string());
        }

        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            return Err("Password must contain at least one lowercase letter".to_string());
        }

        if self.require_number && !password.chars().any(|c| c.is_numeric()) {
            return Err("Password must contain at least one number".to_string());
        }

        if self.require_special && !password.chars().any(|c| !c.is_alphanumeric()) {
            return Err("Password must contain at least one special character".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let digest = hash_password("secure_password_123").unwrap();

        assert_eq!(digest.salt.len(), SALT_LEN * 2);
        assert_eq!(digest.hash.len(), HASH_LEN * 2);

        assert!(verify_password("secure_password_123", &digest.salt, &digest.hash));
        assert!(!verify_password("wrong_password", &digest.salt, &digest.hash));
    }

    #[test]
    fn test_same_password_different_salts() {
        let a = hash_password("same_password1").unwrap();
        let b = hash_password("same_password1").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_malformed_digest_never_verifies() {
        assert!(!verify_password("anything", "not-hex", "also-not-hex"));
        assert!(!verify_password("anything", "00", "00"));
    }

    #[test]
    fn test_policy() {
        let policy = PasswordPolicy {
            require_uppercase: true,
            ..Default::default()
        };

        assert!(policy.validate("Ab1").is_err());
        assert!(policy.validate("abcdefgh1").is_err());
        assert!(policy.validate("Abcdefgh").is_err());
        assert!(policy.validate("Abcdefgh1").is_ok());
    }
}
