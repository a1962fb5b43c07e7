//! Container naming.
//!
//! Every container maps to `<data_dir>/<name>.hexa`. Node and file
//! containers derive their names from entity ids.

use crate::cipher::id;
use crate::errors::{HexaError, HexaResult};

/// Container file extension
pub const EXTENSION: &str = "hexa";

pub const USERS: &str = "users";
pub const SESSIONS: &str = "sessions";
pub const AUDIT: &str = "audit";
pub const DATABASES: &str = "databases";

/// Containers that exist independently of the hierarchy
pub const FIXED: [&str; 4] = [USERS, SESSIONS, AUDIT, DATABASES];

/// Key holding a node descriptor inside its own container
pub const METADATA_KEY: &str = "metadata";

pub fn cluster(id: &str) -> String {
    id.to_string()
}

pub fn collection(id: &str) -> String {
    id.to_string()
}

pub fn bucket(id: &str) -> String {
    format!("bucket_{}", id)
}

pub fn folder(id: &str) -> String {
    format!("folder_{}", id)
}

pub fn file(id: &str) -> String {
    format!("file_{}", id)
}

/// Whether `name` is shaped like a node or file container the hierarchy
/// creates. Anything else belongs to some other caller.
pub fn is_hierarchy_container(name: &str) -> bool {
    let prefixes = [
        cluster(&format!("{}_", id::CLUSTER)),
        collection(&format!("{}_", id::COLLECTION)),
        bucket(&format!("{}_", id::BUCKET)),
        folder(&format!("{}_", id::FOLDER)),
        file(&format!("{}_", id::FILE)),
    ];
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

/// Reject names that could escape the data directory
pub fn validate(name: &str) -> HexaResult<()> {
    if name.is_empty() {
        return Err(HexaError::validation("container name must not be empty"));
    }
    if name.starts_with('.') {
        return Err(HexaError::validation(format!(
            "container name '{}' must not start with '.'",
            name
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(HexaError::validation(format!(
            "container name '{}' contains a path separator",
            name
        )));
    }
    Ok(())
}
