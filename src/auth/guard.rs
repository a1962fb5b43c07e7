//! # Authorization Guard
//!
//! Stateless evaluator deciding whether an actor may perform an action on a
//! resource. Access is granted when the actor owns the resource, when the
//! resource ACL names the actor with `"admin"` or the action, or when the
//! actor's role holds `{kind}.{action}`.
//!
//! Every hierarchy mutation calls [`AuthorizationGuard::require`] before it
//! writes anything.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{HexaError, HexaResult};

use super::jwt::Claims;
use super::role::{has_permission, Role};

/// Per-actor ACL: user id to granted actions (or `"admin"`)
pub type Acl = BTreeMap<String, Vec<String>>;

/// ACL entry value that grants every action
pub const ACL_ADMIN: &str = "admin";

/// The authenticated party performing an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Maintenance actor used by the operator tooling
    pub fn system() -> Self {
        Self::new("system", Role::SuperAdmin)
    }
}

impl From<&Claims> for Actor {
    fn from(claims: &Claims) -> Self {
        Self::new(claims.user_id.clone(), claims.role)
    }
}

/// What an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Database,
    Cluster,
    Collection,
    Bucket,
    Folder,
    File,
    User,
}

impl ResourceKind {
    /// Permission namespace used for role checks.
    /// Clusters are governed as part of their database and folders as part
    /// of their bucket.
    pub fn namespace(&self) -> &'static str {
        match self {
            ResourceKind::Database | ResourceKind::Cluster => "db",
            ResourceKind::Collection => "collection",
            ResourceKind::Bucket | ResourceKind::Folder => "bucket",
            ResourceKind::File => "file",
            ResourceKind::User => "user",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Collection => "collection",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Folder => "folder",
            ResourceKind::File => "file",
            ResourceKind::User => "user",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Write,
    Delete,
    Admin,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Admin => "admin",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization view of a hierarchy node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub owner_id: Option<String>,
    pub acl: Acl,
}

impl Resource {
    pub fn new(kind: ResourceKind, owner_id: Option<String>, acl: Acl) -> Self {
        Self {
            kind,
            owner_id,
            acl,
        }
    }

    /// A resource with no owner and no ACL; only role permissions apply
    pub fn unowned(kind: ResourceKind) -> Self {
        Self::new(kind, None, Acl::new())
    }
}

/// Stateless access evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationGuard;

impl AuthorizationGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn has_permission(&self, role: Role, permission: &str) -> bool {
        has_permission(role, permission)
    }

    /// Owner, then ACL, then role table
    pub fn can_access_resource(&self, actor: &Actor, resource: &Resource, action: Action) -> bool {
        if resource.owner_id.as_deref() == Some(actor.user_id.as_str()) {
            return true;
        }

        if let Some(granted) = resource.acl.get(&actor.user_id) {
            if granted
                .iter()
                .any(|g| g == ACL_ADMIN || g == action.as_str())
            {
                return true;
            }
        }

        has_permission(
            actor.role,
            &format!("{}.{}", resource.kind.namespace(), action.as_str()),
        )
    }

    /// Fail with `PermissionDenied` unless access is granted
    pub fn require(&self, actor: &Actor, resource: &Resource, action: Action) -> HexaResult<()> {
        if self.can_access_resource(actor, resource, action) {
            return Ok(());
        }

        warn!(
            user_id = %actor.user_id,
            role = %actor.role,
            kind = %resource.kind,
            action = %action,
            "access denied"
        );
        Err(HexaError::permission_denied(format!(
            "{} may not {} {}",
            actor.role, action, resource.kind
        )))
    }

    /// Fail with `PermissionDenied` unless the role holds `permission`
    pub fn require_permission(&self, actor: &Actor, permission: &str) -> HexaResult<()> {
        if has_permission(actor.role, permission) {
            return Ok(());
        }

        warn!(user_id = %actor.user_id, role = %actor.role, permission, "permission denied");
        Err(HexaError::permission_denied(format!(
            "{} lacks {}",
            actor.role, permission
        )))
    }

    /// Consult the role-change table
    pub fn can_change_role(&self, actor: Role, target: Role, new_role: Role) -> bool {
        ROLE_CHANGE_RULES
            .iter()
            .filter(|rule| rule.actor == actor)
            .any(|rule| rule.targets.contains(&target) && rule.grants.contains(&new_role))
    }
}

/// One row of the role-change policy: an actor of role `actor` may move a
/// user currently holding any of `targets` to any of `grants`.
#[derive(Debug, Clone, Copy)]
pub struct RoleChangeRule {
    pub actor: Role,
    pub targets: &'static [Role],
    pub grants: &'static [Role],
}

/// Role-change policy. Viewers have no row and may change nothing.
/// No row grants superadmin; that role exists only through registration.
pub const ROLE_CHANGE_RULES: &[RoleChangeRule] = &[
    RoleChangeRule {
        actor: Role::User,
        targets: &[Role::Viewer],
        grants: &[Role::User],
    },
    RoleChangeRule {
        actor: Role::Admin,
        targets: &[Role::Viewer, Role::User, Role::Admin],
        grants: &[Role::User, Role::Admin],
    },
    RoleChangeRule {
        actor: Role::SuperAdmin,
        targets: &[Role::Viewer, Role::User, Role::Admin, Role::SuperAdmin],
        grants: &[Role::User, Role::Admin],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn database_owned_by(owner: &str) -> Resource {
        Resource::new(ResourceKind::Database, Some(owner.to_string()), Acl::new())
    }

    #[test]
    fn test_owner_always_allowed() {
        let guard = AuthorizationGuard::new();
        let viewer = Actor::new("user_1", Role::Viewer);

        assert!(guard.can_access_resource(&viewer, &database_owned_by("user_1"), Action::Delete));
        assert!(!guard.can_access_resource(&viewer, &database_owned_by("user_2"), Action::Delete));
    }

    #[test]
    fn test_acl_grants() {
        let guard = AuthorizationGuard::new();
        let viewer = Actor::new("user_1", Role::Viewer);

        let mut acl = Acl::new();
        acl.insert("user_1".to_string(), vec!["write".to_string()]);
        let resource = Resource::new(ResourceKind::Collection, Some("owner".to_string()), acl);

        assert!(guard.can_access_resource(&viewer, &resource, Action::Write));
        assert!(!guard.can_access_resource(&viewer, &resource, Action::Delete));

        let mut acl = Acl::new();
        acl.insert("user_1".to_string(), vec![ACL_ADMIN.to_string()]);
        let resource = Resource::new(ResourceKind::Collection, Some("owner".to_string()), acl);
        assert!(guard.can_access_resource(&viewer, &resource, Action::Delete));
    }

    #[test]
    fn test_role_fallback_uses_namespace() {
        let guard = AuthorizationGuard::new();
        let user = Actor::new("user_1", Role::User);

        assert!(guard.can_access_resource(&user, &Resource::unowned(ResourceKind::Cluster), Action::Write));
        assert!(!guard.can_access_resource(&user, &Resource::unowned(ResourceKind::Cluster), Action::Create));
        assert!(guard.can_access_resource(&user, &Resource::unowned(ResourceKind::Folder), Action::Create));
        assert!(guard
            .require(&user, &Resource::unowned(ResourceKind::Database), Action::Delete)
            .is_err());
    }

    #[test]
    fn test_role_change_table() {
        let guard = AuthorizationGuard::new();
        use Role::*;

        for target in Role::ALL {
            for new_role in Role::ALL {
                assert!(!guard.can_change_role(Viewer, target, new_role));
                assert!(!guard.can_change_role(SuperAdmin, target, SuperAdmin));
                assert!(!guard.can_change_role(Admin, target, Viewer));
            }
        }

        assert!(guard.can_change_role(User, Viewer, User));
        assert!(!guard.can_change_role(User, Viewer, Admin));
        assert!(!guard.can_change_role(User, User, User));

        assert!(guard.can_change_role(Admin, Viewer, Admin));
        assert!(guard.can_change_role(Admin, Admin, User));
        assert!(!guard.can_change_role(Admin, SuperAdmin, User));

        assert!(guard.can_change_role(SuperAdmin, SuperAdmin, Admin));
        assert!(guard.can_change_role(SuperAdmin, Viewer, User));
    }
}
