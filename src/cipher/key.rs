//! # Key Manager
//!
//! Holds the process-wide container key and seals/opens envelopes with it.
//!
//! The key is a raw 32-byte file. It is generated on first use and never
//! rotated while the process runs. A `KeyManager` is built once at startup
//! and handed to every store as `Arc<KeyManager>`.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use aes::Aes256;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, Nonce};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::envelope::Envelope;
use super::errors::{CipherError, CipherResult};

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

/// IV length. 128-bit nonces keep existing `.hexa` files readable.
pub const IV_LEN: usize = 16;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

type ContainerCipher = AesGcm<Aes256, U16>;

/// Container key holder
pub struct KeyManager {
    cipher: ContainerCipher,
    fingerprint: String,
}

impl KeyManager {
    /// Build a key manager from raw key bytes
    pub fn from_bytes(key: [u8; KEY_LEN]) -> CipherResult<Self> {
        let cipher = ContainerCipher::new_from_slice(&key)
            .map_err(|_| CipherError::InvalidKey("key must be 32 bytes".to_string()))?;

        let digest = Sha256::digest(key);
        Ok(Self {
            cipher,
            fingerprint: hex::encode(&digest[..8]),
        })
    }

    /// Build a key manager around a fresh random key (not persisted)
    pub fn generate() -> CipherResult<Self> {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::from_bytes(key)
    }

    /// Load the key at `path`, or generate and persist one if absent.
    ///
    /// Fails fast when the file has the wrong length or the path is not
    /// writable.
    pub fn load_or_generate(path: &Path) -> CipherResult<Self> {
        if path.exists() {
            let bytes = fs::read(path).map_err(|e| CipherError::key_file(path, e))?;
            let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                CipherError::InvalidKey(format!(
                    "{} holds {} bytes, expected {}",
                    path.display(),
                    bytes.len(),
                    KEY_LEN
                ))
            })?;

            let manager = Self::from_bytes(key)?;
            info!(path = %path.display(), fingerprint = %manager.fingerprint, "encryption key loaded");
            return Ok(manager);
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        persist_key(path, &key)?;

        let manager = Self::from_bytes(key)?;
        info!(path = %path.display(), fingerprint = %manager.fingerprint, "encryption key generated");
        Ok(manager)
    }

    /// Short SHA-256 fingerprint of the key, safe to log
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Serialize `value` to JSON and seal it under a fresh IV.
    ///
    /// Sealing the same value twice never yields the same envelope.
    pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> CipherResult<Envelope> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CipherError::Serialization(e.to_string()))?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| CipherError::EncryptionFailed)?;

        // aes-gcm appends the tag to the ciphertext
        let auth_tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(Envelope {
            iv: hex::encode(iv),
            data: hex::encode(sealed),
            auth_tag: hex::encode(auth_tag),
            timestamp: Utc::now(),
        })
    }

    /// Authenticate and open an envelope.
    ///
    /// Any decode, tag or JSON failure is an integrity failure. No partial
    /// plaintext is ever returned.
    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &Envelope) -> CipherResult<T> {
        let iv = decode_field("iv", &envelope.iv)?;
        let mut sealed = decode_field("data", &envelope.data)?;
        let auth_tag = decode_field("authTag", &envelope.auth_tag)?;

        if iv.len() != IV_LEN {
            return Err(CipherError::Integrity(format!(
                "iv is {} bytes, expected {}",
                iv.len(),
                IV_LEN
            )));
        }
        if auth_tag.len() != TAG_LEN {
            return Err(CipherError::Integrity(format!(
                "authTag is {} bytes, expected {}",
                auth_tag.len(),
                TAG_LEN
            )));
        }

        sealed.extend_from_slice(&auth_tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::<U16>::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CipherError::Integrity("authentication tag mismatch".to_string()))?;

        debug!(bytes = plaintext.len(), "envelope opened");

        serde_json::from_slice(&plaintext)
            .map_err(|e| CipherError::Integrity(format!("plaintext is not valid JSON: {}", e)))
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn decode_field(name: &str, value: &str) -> CipherResult<Vec<u8>> {
    hex::decode(value).map_err(|e| CipherError::Integrity(format!("{} is not valid hex: {}", name, e)))
}

fn persist_key(path: &Path, key: &[u8; KEY_LEN]) -> CipherResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CipherError::key_file(parent, e))?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| CipherError::key_file(path, e))?;
    file.write_all(key)
        .and_then(|_| file.sync_all())
        .map_err(|e| CipherError::key_file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let keys = KeyManager::generate().unwrap();
        let value = json!({ "name": "alpha", "count": 3, "tags": ["a", "b"] });

        let envelope = keys.encrypt(&value).unwrap();
        let opened: Value = keys.decrypt(&envelope).unwrap();

        assert_eq!(opened, value);
    }

    #[test]
    fn test_same_plaintext_yields_different_envelopes() {
        let keys = KeyManager::generate().unwrap();
        let value = json!({ "same": true });

        let a = keys.encrypt(&value).unwrap();
        let b = keys.encrypt(&value).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_flipped_tag_fails_closed() {
        let keys = KeyManager::generate().unwrap();
        let mut envelope = keys.encrypt(&json!({ "secret": 42 })).unwrap();

        let mut tag = hex::decode(&envelope.auth_tag).unwrap();
        tag[0] ^= 0x01;
        envelope.auth_tag = hex::encode(tag);

        let result: CipherResult<Value> = keys.decrypt(&envelope);
        assert!(matches!(result, Err(CipherError::Integrity(_))));
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let envelope = KeyManager::generate()
            .unwrap()
            .encrypt(&json!({ "a": 1 }))
            .unwrap();

        let other = KeyManager::generate().unwrap();
        let result: CipherResult<Value> = other.decrypt(&envelope);
        assert!(matches!(result, Err(CipherError::Integrity(_))));
    }

    #[test]
    fn test_bad_hex_is_integrity_failure() {
        let keys = KeyManager::generate().unwrap();
        let mut envelope = keys.encrypt(&json!({})).unwrap();
        envelope.iv = "zz".to_string();

        let result: CipherResult<Value> = keys.decrypt(&envelope);
        assert!(matches!(result, Err(CipherError::Integrity(_))));
    }

    #[test]
    fn test_key_persisted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("encryption.key");

        let first = KeyManager::load_or_generate(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), KEY_LEN);

        let second = KeyManager::load_or_generate(&path).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());

        let envelope = first.encrypt(&json!({ "k": "v" })).unwrap();
        let opened: Value = second.decrypt(&envelope).unwrap();
        assert_eq!(opened["k"], "v");
    }

    #[test]
    fn test_short_key_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("encryption.key");
        fs::write(&path, [7u8; 10]).unwrap();

        let result = KeyManager::load_or_generate(&path);
        assert!(matches!(result, Err(CipherError::InvalidKey(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let keys = KeyManager::from_bytes([1u8; KEY_LEN]).unwrap();
        let rendered = format!("{:?}", keys);
        assert!(rendered.contains(keys.fingerprint()));
    }
}
