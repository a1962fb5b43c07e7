//! # Configuration
//!
//! JSON configuration with per-field defaults. A missing file is replaced by
//! the defaults on first run. Selected fields can be overridden from the
//! environment:
//! - `HEXABASE_DATA_DIR`
//! - `HEXABASE_KEY_PATH`
//! - `HEXABASE_JWT_SECRET`

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{AuthConfig, JwtConfig, SessionConfig};
use crate::cipher::PasswordPolicy;
use crate::errors::{HexaError, HexaResult};

pub const ENV_DATA_DIR: &str = "HEXABASE_DATA_DIR";
pub const ENV_KEY_PATH: &str = "HEXABASE_KEY_PATH";
pub const ENV_JWT_SECRET: &str = "HEXABASE_JWT_SECRET";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HexabaseConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the `.hexa` containers
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Raw 32-byte encryption key, created on first run
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_key_path() -> PathBuf {
    PathBuf::from("./config/encryption.key")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            key_path: default_key_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_ttl_hours")]
    pub token_ttl_hours: i64,

    #[serde(default = "default_ttl_hours")]
    pub session_ttl_hours: i64,

    #[serde(default)]
    pub password_policy: PasswordPolicy,
}

fn default_jwt_secret() -> String {
    JwtConfig::default().secret
}
fn default_ttl_hours() -> i64 {
    24
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_ttl_hours(),
            session_ttl_hours: default_ttl_hours(),
            password_policy: PasswordPolicy::default(),
        }
    }
}

impl SecurityConfig {
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == default_jwt_secret()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl HexabaseConfig {
    /// Load configuration from file, then apply environment overrides
    pub fn load(path: &Path) -> HexaResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| HexaError::io(format!("read config {}", path.display()), e))?;

        let mut config: HexabaseConfig = serde_json::from_str(&content)
            .map_err(|e| HexaError::config(format!("invalid config JSON: {}", e)))?;

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load the file, writing defaults first if it does not exist
    pub fn load_or_default(path: &Path) -> HexaResult<Self> {
        if !path.exists() {
            HexabaseConfig::default().save(path)?;
            info!(path = %path.display(), "default configuration written");
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> HexaResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| HexaError::io(format!("create {}", parent.display()), e))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| HexaError::config(format!("serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| HexaError::io(format!("write config {}", path.display()), e))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_KEY_PATH).filter(|v| !v.is_empty()) {
            self.storage.key_path = PathBuf::from(path);
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|v| !v.is_empty()) {
            self.security.jwt_secret = secret;
        }
    }

    fn validate(&self) -> HexaResult<()> {
        if self.security.jwt_secret.is_empty() {
            return Err(HexaError::config("security.jwt_secret must not be empty"));
        }
        if self.security.token_ttl_hours <= 0 {
            return Err(HexaError::config("security.token_ttl_hours must be > 0"));
        }
        if self.security.session_ttl_hours <= 0 {
            return Err(HexaError::config("security.session_ttl_hours must be > 0"));
        }
        if self.security.password_policy.min_length == 0 {
            return Err(HexaError::config("security.password_policy.min_length must be > 0"));
        }
        Ok(())
    }

    /// Identity settings derived from the security section
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt: JwtConfig {
                secret: self.security.jwt_secret.clone(),
                ttl: Duration::hours(self.security.token_ttl_hours),
                ..JwtConfig::default()
            },
            sessions: SessionConfig {
                ttl: Duration::hours(self.security.session_ttl_hours),
            },
            password_policy: self.security.password_policy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: HexabaseConfig =
            serde_json::from_str(r#"{ "storage": { "data_dir": "/srv/hexa" } }"#).unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/hexa"));
        assert_eq!(config.storage.key_path, default_key_path());
        assert_eq!(config.security.token_ttl_hours, 24);
        assert_eq!(config.security.password_policy.min_length, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_or_default_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("hexabase.json");

        let config = HexabaseConfig::load_or_default(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_overrides() {
        let mut config = HexabaseConfig::default();
        config.apply_overrides(|name| match name {
            ENV_DATA_DIR => Some("/tmp/elsewhere".to_string()),
            ENV_JWT_SECRET => Some("s3cret".to_string()),
            _ => None,
        });

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.storage.key_path, default_key_path());
        assert_eq!(config.security.jwt_secret, "s3cret");
        assert!(!config.security.uses_default_secret());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "security": { "token_ttl_hours": 0 } }"#).unwrap();

        assert!(matches!(HexabaseConfig::load(&path), Err(HexaError::Config(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(HexabaseConfig::load(&path), Err(HexaError::Config(_))));
    }

    #[test]
    fn test_auth_config_ttls() {
        let mut config = HexabaseConfig::default();
        config.security.token_ttl_hours = 2;
        config.security.session_ttl_hours = 3;

        let auth = config.to_auth_config();
        assert_eq!(auth.jwt.ttl, Duration::hours(2));
        assert_eq!(auth.sessions.ttl, Duration::hours(3));
        assert_eq!(auth.jwt.issuer, "hexabase");
    }
}
