//! # Authentication Service
//!
//! Registration, login, token verification, password and role changes.
//! Every state change is written to the audit log.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cipher::{hash_password, PasswordPolicy};
use crate::container::Storage;
use crate::errors::{HexaError, HexaResult};

use super::audit::{AuditAction, AuditLog};
use super::guard::{Actor, AuthorizationGuard};
use super::jwt::{Claims, JwtConfig, JwtManager};
use super::role::Role;
use super::session::{ClientInfo, SessionConfig, SessionManager};
use super::user::{User, UserDirectory, UserProfile};

/// Identity configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub jwt: JwtConfig,
    pub sessions: SessionConfig,
    pub password_policy: PasswordPolicy,
}

/// Result of a successful login
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub token: String,
    pub session_id: String,
    pub user: UserProfile,
}

/// Identity entry points
#[derive(Debug, Clone)]
pub struct AuthService {
    users: UserDirectory,
    sessions: SessionManager,
    audit: AuditLog,
    jwt: JwtManager,
    policy: PasswordPolicy,
    guard: AuthorizationGuard,
}

impl AuthService {
    pub fn new(storage: &Storage, config: AuthConfig) -> HexaResult<Self> {
        Ok(Self {
            users: UserDirectory::open(storage)?,
            sessions: SessionManager::open(storage, config.sessions)?,
            audit: AuditLog::open(storage)?,
            jwt: JwtManager::new(config.jwt),
            policy: config.password_policy,
            guard: AuthorizationGuard::new(),
        })
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Create a user and return a token for it.
    ///
    /// Only one superadmin may exist. Emails are unique.
    pub fn register(&self, name: &str, email: &str, password: &str, role: Role) -> HexaResult<String> {
        let name = name.trim();
        let email = email.trim();

        if name.is_empty() {
            return Err(HexaError::validation("name must not be empty"));
        }
        if !email.contains('@') {
            return Err(HexaError::validation(format!("'{}' is not an email address", email)));
        }
        self.policy.validate(password).map_err(HexaError::Validation)?;

        let digest = hash_password(password)?;
        let user = User::new(name, email, digest.salt, digest.hash, role);
        self.users.insert_unique(&user)?;

        self.audit.record(
            AuditAction::UserRegister,
            &user.id,
            json!({ "email": email, "name": name, "role": role }),
        )?;
        info!(user_id = %user.id, role = %role, "user registered");

        self.jwt.issue(&user)
    }

    /// Authenticate by email and password and open a session
    pub fn login(&self, email: &str, password: &str, client: ClientInfo) -> HexaResult<LoginOutcome> {
        let now = Utc::now();
        let mut user = match self.users.find_by_email(email.trim())? {
            Some(user) if user.is_active => user,
            _ => return Err(HexaError::InvalidCredentials),
        };

        if user.is_locked(now) {
            let until = user
                .security
                .locked_until
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            return Err(HexaError::AccountLocked(until));
        }

        if !user.verify_password(password) {
            user.record_failed_login(now);
            self.users.save(&user)?;
            self.audit.record(
                AuditAction::LoginFailed,
                &user.id,
                json!({ "attempts": user.security.login_attempts }),
            )?;
            warn!(user_id = %user.id, attempts = user.security.login_attempts, "login failed");
            return Err(HexaError::InvalidCredentials);
        }

        user.record_successful_login(now);
        self.users.save(&user)?;

        let session = self.sessions.create_session(&user.id, client)?;
        self.audit
            .record(AuditAction::UserLogin, &user.id, json!({ "email": user.email }))?;

        Ok(LoginOutcome {
            token: self.jwt.issue(&user)?,
            session_id: session.id,
            user: user.profile(),
        })
    }

    pub fn logout(&self, session_id: &str) -> HexaResult<bool> {
        self.sessions.invalidate_session(session_id)
    }

    /// Validate a token and return its claims
    pub fn verify_token(&self, token: &str) -> HexaResult<Claims> {
        self.jwt.verify(token)
    }

    /// Resolve a token to the actor it represents
    pub fn authenticate(&self, token: &str) -> HexaResult<Actor> {
        Ok(Actor::from(&self.verify_token(token)?))
    }

    pub fn change_password(&self, user_id: &str, current: &str, new_password: &str) -> HexaResult<()> {
        let mut user = self.users.require(user_id)?;

        if !user.verify_password(current) {
            return Err(HexaError::InvalidCredentials);
        }
        self.policy
            .validate(new_password)
            .map_err(HexaError::Validation)?;

        let digest = hash_password(new_password)?;
        let now = Utc::now();
        user.password_salt = digest.salt;
        user.password_hash = digest.hash;
        user.security.password_changed_at = Some(now);
        user.updated_at = now;
        self.users.save(&user)?;

        self.audit
            .record(AuditAction::PasswordChange, user_id, json!({}))?;
        Ok(())
    }

    /// Change another user's role according to the role-change table
    pub fn change_user_role(&self, actor: &Actor, target_id: &str, new_role: Role) -> HexaResult<UserProfile> {
        let mut target = self.users.require(target_id)?;

        if !self.guard.can_change_role(actor.role, target.role, new_role) {
            warn!(
                user_id = %actor.user_id,
                target = %target_id,
                from = %target.role,
                to = %new_role,
                "role change refused"
            );
            return Err(HexaError::permission_denied(format!(
                "{} may not change a {} to {}",
                actor.role, target.role, new_role
            )));
        }

        let previous = target.role;
        target.role = new_role;
        target.updated_at = Utc::now();
        self.users.save(&target)?;

        self.audit.record(
            AuditAction::RoleChange,
            &actor.user_id,
            json!({ "targetUserId": target_id, "from": previous, "newRole": new_role }),
        )?;
        Ok(target.profile())
    }

    pub fn get_user(&self, user_id: &str) -> HexaResult<Option<UserProfile>> {
        Ok(self.users.get(user_id)?.map(|u| u.profile()))
    }

    /// All users, for actors holding `user.read`
    pub fn list_users(&self, actor: &Actor) -> HexaResult<Vec<UserProfile>> {
        self.guard.require_permission(actor, "user.read")?;
        Ok(self.users.list()?.iter().map(User::profile).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KeyManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> AuthService {
        let keys = Arc::new(KeyManager::generate().unwrap());
        let storage = Storage::open(dir.path(), keys).unwrap();
        AuthService::new(&storage, AuthConfig::default()).unwrap()
    }

    #[test]
    fn test_register_validates_input() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);

        assert!(matches!(
            auth.register("", "a@b.c", "password1", Role::User),
            Err(HexaError::Validation(_))
        ));
        assert!(matches!(
            auth.register("Ada", "not-an-email", "password1", Role::User),
            Err(HexaError::Validation(_))
        ));
        assert!(matches!(
            auth.register("Ada", "a@b.c", "short", Role::User),
            Err(HexaError::Validation(_))
        ));
    }

    #[test]
    fn test_wrong_password_is_generic() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("Ada", "ada@example.com", "password1", Role::User).unwrap();

        let wrong = auth.login("ada@example.com", "password2", ClientInfo::default());
        let unknown = auth.login("bob@example.com", "password1", ClientInfo::default());

        assert!(matches!(wrong, Err(HexaError::InvalidCredentials)));
        assert!(matches!(unknown, Err(HexaError::InvalidCredentials)));
    }

    #[test]
    fn test_change_password() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        let token = auth.register("Ada", "ada@example.com", "password1", Role::User).unwrap();
        let user_id = auth.verify_token(&token).unwrap().user_id;

        assert!(auth.change_password(&user_id, "nope", "password2").is_err());
        auth.change_password(&user_id, "password1", "password2").unwrap();

        assert!(auth.login("ada@example.com", "password1", ClientInfo::default()).is_err());
        assert!(auth.login("ada@example.com", "password2", ClientInfo::default()).is_ok());
    }

    #[test]
    fn test_list_users_requires_permission() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        let token = auth.register("Vi", "vi@example.com", "password1", Role::Viewer).unwrap();
        let viewer = auth.authenticate(&token).unwrap();

        assert!(matches!(auth.list_users(&viewer), Err(HexaError::PermissionDenied(_))));
        assert_eq!(auth.list_users(&Actor::system()).unwrap().len(), 1);
    }
}
