//! Opaque entity identifiers: `<prefix>_<epochMillis>_<16 hex>`.

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;

pub const DATABASE: &str = "db";
pub const CLUSTER: &str = "cluster";
pub const COLLECTION: &str = "coll";
pub const BUCKET: &str = "bucket";
pub const FOLDER: &str = "folder";
pub const FILE: &str = "file";
pub const DOCUMENT: &str = "doc";
pub const USER: &str = "user";
pub const SESSION: &str = "session";
pub const AUDIT: &str = "audit";
pub const URL: &str = "url";

/// Generate a new identifier with the given prefix
pub fn generate_id(prefix: &str) -> String {
    let mut random = [0u8; 8];
    OsRng.fill_bytes(&mut random);
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().timestamp_millis(),
        hex::encode(random)
    )
}
