//! # Roles and Permissions
//!
//! Four ordered roles and the static permission table consulted by the
//! authorization guard.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::HexaError;

/// User role, ordered by privilege
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Viewer,
    User,
    Admin,
    SuperAdmin,
}

/// Grants every permission
pub const WILDCARD: &str = "*";

const SUPERADMIN_PERMISSIONS: &[&str] = &[WILDCARD];

const ADMIN_PERMISSIONS: &[&str] = &[
    "db.create",
    "db.delete",
    "db.read",
    "db.write",
    "db.admin",
    "collection.delete",
    "bucket.delete",
    "file.delete",
    "user.read",
    "user.manage",
    "system.monitor",
];

const USER_PERMISSIONS: &[&str] = &[
    "db.read",
    "db.write",
    "collection.create",
    "collection.read",
    "collection.write",
    "bucket.create",
    "bucket.read",
    "bucket.write",
    "file.read",
    "file.write",
];

const VIEWER_PERMISSIONS: &[&str] = &["db.read", "collection.read", "bucket.read", "file.read"];

impl Role {
    pub const ALL: [Role; 4] = [Role::Viewer, Role::User, Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "superadmin",
        }
    }

    /// Permission strings introduced at this role. Each role also holds
    /// everything granted to the roles below it.
    pub fn own_permissions(&self) -> &'static [&'static str] {
        match self {
            Role::SuperAdmin => SUPERADMIN_PERMISSIONS,
            Role::Admin => ADMIN_PERMISSIONS,
            Role::User => USER_PERMISSIONS,
            Role::Viewer => VIEWER_PERMISSIONS,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::SuperAdmin),
            other => Err(HexaError::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Whether `role` holds `permission`, directly, through a lower role, or
/// through the wildcard
pub fn has_permission(role: Role, permission: &str) -> bool {
    Role::ALL
        .iter()
        .filter(|r| **r <= role)
        .flat_map(|r| r.own_permissions().iter())
        .any(|p| *p == WILDCARD || *p == permission)
}
