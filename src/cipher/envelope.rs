//! On-disk envelope format.
//!
//! A `.hexa` file holds exactly one pretty-printed envelope:
//! `{ "iv", "data", "authTag", "timestamp" }` with hex-encoded binary fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{CipherError, CipherResult};

/// Sealed container payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-write random IV (hex)
    pub iv: String,

    /// Ciphertext without the tag (hex)
    pub data: String,

    /// GCM tag (hex)
    #[serde(rename = "authTag")]
    pub auth_tag: String,

    /// When the envelope was sealed
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Parse an envelope from file contents
    pub fn from_json(bytes: &[u8]) -> CipherResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CipherError::Integrity(format!("malformed envelope: {}", e)))
    }

    /// Render the envelope for disk
    pub fn to_json(&self) -> CipherResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CipherError::Serialization(e.to_string()))
    }
}
