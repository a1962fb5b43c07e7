//! # Users
//!
//! User records and the directory that persists them in the `users`
//! container, keyed by user id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cipher::{generate_id, id, verify_password};
use crate::container::{naming, ContainerStore, FilterExpr, FilterSet, Storage};
use crate::errors::{HexaError, HexaResult};

use super::role::Role;

/// Failed logins before the account is locked
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// How long a locked account stays locked
pub fn lockout_duration() -> Duration {
    Duration::minutes(15)
}

/// Login bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSecurity {
    #[serde(default)]
    pub login_attempts: u32,
    #[serde(default)]
    pub last_failed_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub password_changed_at: Option<DateTime<Utc>>,
}

/// Stored user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_salt: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub security: UserSecurity,
}

impl User {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password_salt: String,
        password_hash: String,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(id::USER),
            name: name.into(),
            email: email.into(),
            password_salt,
            password_hash,
            role,
            created_at: now,
            updated_at: now,
            is_active: true,
            last_login: None,
            security: UserSecurity::default(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_salt, &self.password_hash)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.security
            .locked_until
            .map(|until| until > now)
            .unwrap_or(false)
    }

    /// Count a failed login, locking the account at the threshold
    pub fn record_failed_login(&mut self, now: DateTime<Utc>) {
        self.security.login_attempts += 1;
        self.security.last_failed_login = Some(now);
        if self.security.login_attempts >= MAX_LOGIN_ATTEMPTS {
            self.security.locked_until = Some(now + lockout_duration());
        }
        self.updated_at = now;
    }

    pub fn record_successful_login(&mut self, now: DateTime<Utc>) {
        self.security.login_attempts = 0;
        self.security.locked_until = None;
        self.last_login = Some(now);
        self.updated_at = now;
    }

    /// Public view without password material
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            is_active: self.is_active,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// User as shown to other callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Persistence for users
#[derive(Debug, Clone)]
pub struct UserDirectory {
    store: ContainerStore,
}

impl UserDirectory {
    pub fn open(storage: &Storage) -> HexaResult<Self> {
        Ok(Self {
            store: storage.container(naming::USERS)?,
        })
    }

    pub fn get(&self, user_id: &str) -> HexaResult<Option<User>> {
        self.store.get(user_id)
    }

    pub fn require(&self, user_id: &str) -> HexaResult<User> {
        self.get(user_id)?
            .ok_or_else(|| HexaError::not_found(format!("user {}", user_id)))
    }

    pub fn find_by_email(&self, email: &str) -> HexaResult<Option<User>> {
        Ok(self
            .store
            .find_typed::<User>(&FilterExpr::eq("email", email).into())?
            .into_iter()
            .next())
    }

    pub fn any_with_role(&self, role: Role) -> HexaResult<bool> {
        let filters = FilterSet::new().and(FilterExpr::eq("role", role.as_str()));
        Ok(self.store.find_one(&filters)?.is_some())
    }

    pub fn list(&self) -> HexaResult<Vec<User>> {
        self.store.find_typed(&FilterSet::new())
    }

    pub fn save(&self, user: &User) -> HexaResult<()> {
        self.store.save(&user.id, user)?;
        Ok(())
    }

    /// Insert `user` unless the email is taken or it would be a second
    /// superadmin. Both checks and the write happen under one lock.
    pub fn insert_unique(&self, user: &User) -> HexaResult<()> {
        let record = serde_json::to_value(user)
            .map_err(|e| HexaError::internal(format!("serialize user: {}", e)))?;

        self.store.mutate(|records| {
            for existing in records.values() {
                if existing.get("email").and_then(|v| v.as_str()) == Some(user.email.as_str()) {
                    return Err(HexaError::conflict("User already exists with this email"));
                }
                if user.role == Role::SuperAdmin
                    && existing.get("role").and_then(|v| v.as_str())
                        == Some(Role::SuperAdmin.as_str())
                {
                    return Err(HexaError::conflict("Super admin already exists"));
                }
            }
            records.insert(user.id.clone(), record);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KeyManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn directory(dir: &TempDir) -> UserDirectory {
        let keys = Arc::new(KeyManager::generate().unwrap());
        UserDirectory::open(&Storage::open(dir.path(), keys).unwrap()).unwrap()
    }

    fn user(email: &str, role: Role) -> User {
        User::new("Test", email, "00".to_string(), "00".to_string(), role)
    }

    #[test]
    fn test_insert_and_lookup() {
        let dir = TempDir::new().unwrap();
        let users = directory(&dir);
        let ada = user("ada@example.com", Role::User);

        users.insert_unique(&ada).unwrap();

        assert_eq!(users.require(&ada.id).unwrap(), ada);
        assert_eq!(users.find_by_email("ada@example.com").unwrap().unwrap().id, ada.id);
        assert!(users.find_by_email("bob@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let dir = TempDir::new().unwrap();
        let users = directory(&dir);

        users.insert_unique(&user("ada@example.com", Role::User)).unwrap();
        let again = users.insert_unique(&user("ada@example.com", Role::Viewer));
        assert!(matches!(again, Err(HexaError::Conflict(_))));
    }

    #[test]
    fn test_single_superadmin() {
        let dir = TempDir::new().unwrap();
        let users = directory(&dir);

        users.insert_unique(&user("root@example.com", Role::SuperAdmin)).unwrap();
        assert!(users.any_with_role(Role::SuperAdmin).unwrap());

        let second = users.insert_unique(&user("other@example.com", Role::SuperAdmin));
        assert!(matches!(second, Err(HexaError::Conflict(_))));
    }

    #[test]
    fn test_lockout_after_repeated_failures() {
        let now = Utc::now();
        let mut u = user("ada@example.com", Role::User);

        for _ in 0..MAX_LOGIN_ATTEMPTS - 1 {
            u.record_failed_login(now);
        }
        assert!(!u.is_locked(now));

        u.record_failed_login(now);
        assert!(u.is_locked(now));
        assert!(!u.is_locked(now + lockout_duration() + Duration::seconds(1)));

        u.record_successful_login(now);
        assert_eq!(u.security.login_attempts, 0);
        assert!(u.last_login.is_some());
    }
}
