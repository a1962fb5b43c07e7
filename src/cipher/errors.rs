//! # Cipher Errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for cipher operations
pub type CipherResult<T> = Result<T, CipherError>;

/// Errors raised by key handling, envelope sealing and password hashing
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key material has the wrong shape
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key file could not be read or persisted
    #[error("Key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Envelope did not decode, authenticate or parse
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Plaintext could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Password hashing failed")]
    HashingFailed,
}

impl CipherError {
    pub(crate) fn key_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::KeyFile {
            path: path.into(),
            source,
        }
    }
}
