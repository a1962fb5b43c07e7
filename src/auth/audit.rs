//! Audit trail for identity events, stored in the `audit` container.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cipher::{generate_id, id};
use crate::container::{naming, ContainerStore, FilterExpr, FilterSet, Storage};
use crate::errors::HexaResult;

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserRegister,
    UserLogin,
    LoginFailed,
    PasswordChange,
    RoleChange,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegister => "USER_REGISTER",
            AuditAction::UserLogin => "USER_LOGIN",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::PasswordChange => "PASSWORD_CHANGE",
            AuditAction::RoleChange => "ROLE_CHANGE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub action: AuditAction,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// Append-only audit log
#[derive(Debug, Clone)]
pub struct AuditLog {
    store: ContainerStore,
}

impl AuditLog {
    pub fn open(storage: &Storage) -> HexaResult<Self> {
        Ok(Self {
            store: storage.container(naming::AUDIT)?,
        })
    }

    pub fn record(&self, action: AuditAction, user_id: &str, metadata: Value) -> HexaResult<AuditEntry> {
        let entry = AuditEntry {
            id: generate_id(id::AUDIT),
            action,
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            metadata,
        };

        self.store.save(&entry.id, &entry)?;
        info!(action = %action, user_id, "audit");
        Ok(entry)
    }

    /// Entries for one user, oldest first
    pub fn entries_for(&self, user_id: &str) -> HexaResult<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .store
            .find_typed(&FilterExpr::eq("userId", user_id).into())?;
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    pub fn all(&self) -> HexaResult<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self.store.find_typed(&FilterSet::new())?;
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KeyManager;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_query() {
        let dir = TempDir::new().unwrap();
        let keys = Arc::new(KeyManager::generate().unwrap());
        let log = AuditLog::open(&Storage::open(dir.path(), keys).unwrap()).unwrap();

        let entry = log
            .record(AuditAction::UserLogin, "user_1", json!({ "email": "a@b.c" }))
            .unwrap();
        log.record(AuditAction::PasswordChange, "user_2", json!({})).unwrap();

        assert!(entry.id.starts_with("audit_"));
        let mine = log.entries_for("user_1").unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].action, AuditAction::UserLogin);
        assert_eq!(log.all().unwrap().len(), 2);
    }
}
