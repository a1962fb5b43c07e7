//! # Hexabase Errors
//!
//! Unified error type returned by the container store, the hierarchy
//! service and the identity layer.

use std::io;

use thiserror::Error;

use crate::cipher::CipherError;

/// Result type for hexabase operations
pub type HexaResult<T> = Result<T, HexaError>;

/// Hexabase error
#[derive(Debug, Error)]
pub enum HexaError {
    // ==================
    // Lookup Errors
    // ==================
    /// Entity or container record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================
    // Integrity Errors
    // ==================
    /// Envelope failed to decode, authenticate or parse.
    /// Never downgraded to an empty result.
    #[error("Integrity failure in {container}: {reason}")]
    IntegrityFailure { container: String, reason: String },

    // ==================
    // Access Errors
    // ==================
    /// Guard refused the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Email or password did not match (generic on purpose)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Too many failed logins
    #[error("Account locked until {0}")]
    AccountLocked(String),

    /// Token failed validation
    #[error("Invalid token: {0}")]
    Token(String),

    // ==================
    // Input Errors
    // ==================
    /// Input rejected before any write happened
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Duplicate name or non-empty parent
    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================
    // Internal Errors
    // ==================
    /// Key file could not be read, written or parsed
    #[error("Key error: {0}")]
    Key(String),

    /// Configuration file missing fields or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Anything else that should never happen
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HexaError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn integrity(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IntegrityFailure {
            container: container.into(),
            reason: reason.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error code for callers and logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "HEXA_NOT_FOUND",
            Self::IntegrityFailure { .. } => "HEXA_INTEGRITY_FAILURE",
            Self::PermissionDenied(_) => "HEXA_PERMISSION_DENIED",
            Self::InvalidCredentials => "HEXA_INVALID_CREDENTIALS",
            Self::AccountLocked(_) => "HEXA_ACCOUNT_LOCKED",
            Self::Token(_) => "HEXA_INVALID_TOKEN",
            Self::Validation(_) => "HEXA_VALIDATION_FAILED",
            Self::Conflict(_) => "HEXA_CONFLICT",
            Self::Key(_) => "HEXA_KEY_ERROR",
            Self::Config(_) => "HEXA_CONFIG_ERROR",
            Self::Io { .. } => "HEXA_IO_ERROR",
            Self::Internal(_) => "HEXA_INTERNAL_ERROR",
        }
    }

    /// HTTP-style status code, for collaborators that front the core
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) => 400,

            // 401 Unauthorized
            Self::InvalidCredentials => 401,
            Self::Token(_) => 401,

            // 403 Forbidden
            Self::PermissionDenied(_) => 403,

            // 404 Not Found
            Self::NotFound(_) => 404,

            // 409 Conflict
            Self::Conflict(_) => 409,

            // 423 Locked
            Self::AccountLocked(_) => 423,

            // 500 Internal Server Error
            Self::IntegrityFailure { .. } => 500,
            Self::Key(_) => 500,
            Self::Config(_) => 500,
            Self::Io { .. } => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Returns whether this error was caused by the caller
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<CipherError> for HexaError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Integrity(reason) => HexaError::integrity("<envelope>", reason),
            CipherError::InvalidKey(msg) => HexaError::Key(msg),
            CipherError::KeyFile { path, source } => {
                HexaError::Key(format!("{}: {}", path.display(), source))
            }
            CipherError::Serialization(msg) => HexaError::Internal(msg),
            CipherError::EncryptionFailed => HexaError::internal("encryption failed"),
            CipherError::HashingFailed => HexaError::internal("password hashing failed"),
        }
    }
}
