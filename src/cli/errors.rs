//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::fmt;
use std::io;

use crate::errors::HexaError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout or data directory)
    IoError,
    /// One or more containers failed to decrypt
    IntegrityFailed,
    /// The requested operation was refused or failed
    CommandFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "HEXA_CLI_CONFIG_ERROR",
            Self::IoError => "HEXA_CLI_IO_ERROR",
            Self::IntegrityFailed => "HEXA_CLI_INTEGRITY_FAILED",
            Self::CommandFailed => "HEXA_CLI_COMMAND_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn integrity_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IntegrityFailed, msg)
    }

    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::CommandFailed, msg)
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<HexaError> for CliError {
    fn from(e: HexaError) -> Self {
        let code = match &e {
            HexaError::IntegrityFailure { .. } => CliErrorCode::IntegrityFailed,
            HexaError::Config(_) | HexaError::Key(_) => CliErrorCode::ConfigError,
            HexaError::Io { .. } => CliErrorCode::IoError,
            _ => CliErrorCode::CommandFailed,
        };
        Self::new(code, e.to_string())
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexa_error_mapping() {
        let integrity: CliError = HexaError::integrity("users", "bad tag").into();
        let config: CliError = HexaError::config("missing").into();
        let denied: CliError = HexaError::permission_denied("no").into();

        assert_eq!(integrity.code(), &CliErrorCode::IntegrityFailed);
        assert_eq!(config.code(), &CliErrorCode::ConfigError);
        assert_eq!(denied.code(), &CliErrorCode::CommandFailed);
        assert!(integrity.to_string().starts_with("HEXA_CLI_INTEGRITY_FAILED"));
    }
}
