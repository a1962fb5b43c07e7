//! # Cipher Service
//!
//! Authenticated encryption of container payloads, salted password hashing
//! and identifier generation.

mod envelope;
mod errors;
pub mod id;
mod key;
mod password;

pub use envelope::Envelope;
pub use errors::{CipherError, CipherResult};
pub use id::generate_id;
pub use key::{KeyManager, IV_LEN, KEY_LEN, TAG_LEN};
pub use password::{constant_time_eq, hash_password, verify_password, PasswordDigest, PasswordPolicy};
