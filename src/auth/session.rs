//! # Session Management
//!
//! Login sessions stored in the `sessions` container. A session expires at
//! its stated time; reading an expired session deactivates it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cipher::{generate_id, id};
use crate::container::{naming, ContainerStore, FilterExpr, FilterSet, Storage};
use crate::errors::{HexaError, HexaResult};

/// Session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Client details recorded with a session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
        }
    }
}

/// Creates, validates and expires sessions
#[derive(Debug, Clone)]
pub struct SessionManager {
    config: SessionConfig,
    store: ContainerStore,
}

impl SessionManager {
    pub fn open(storage: &Storage, config: SessionConfig) -> HexaResult<Self> {
        Ok(Self {
            config,
            store: storage.container(naming::SESSIONS)?,
        })
    }

    pub fn create_session(&self, user_id: &str, client: ClientInfo) -> HexaResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: generate_id(id::SESSION),
            user_id: user_id.to_string(),
            user_agent: client.user_agent,
            ip_address: client.ip_address,
            created_at: now,
            last_activity: now,
            expires_at: now + self.config.ttl,
            is_active: true,
        };

        self.store.save(&session.id, &session)?;
        debug!(session_id = %session.id, user_id, "session created");
        Ok(session)
    }

    /// Return the session if it is still live, touching `lastActivity`.
    /// An expired session is deactivated and `None` is returned. Missing or
    /// already inactive sessions are answered without a write.
    pub fn get_session(&self, session_id: &str) -> HexaResult<Option<Session>> {
        match self.store.get::<Session>(session_id)? {
            Some(session) if session.is_active => {}
            _ => return Ok(None),
        }

        let now = Utc::now();
        self.store.mutate(|records| {
            let Some(raw) = records.get(session_id) else {
                return Ok(None);
            };
            let mut session = decode(session_id, raw)?;
            if !session.is_active {
                return Ok(None);
            }

            let live = session.is_live(now);
            if live {
                session.last_activity = now;
            } else {
                session.is_active = false;
            }
            records.insert(session_id.to_string(), to_record(&session)?);
            Ok(live.then_some(session))
        })
    }

    pub fn invalidate_session(&self, session_id: &str) -> HexaResult<bool> {
        self.deactivate(|session| session.id == session_id)
            .map(|count| count > 0)
    }

    pub fn invalidate_all_user_sessions(&self, user_id: &str) -> HexaResult<usize> {
        self.deactivate(|session| session.user_id == user_id)
    }

    /// Delete sessions that are expired or inactive. Returns how many.
    pub fn cleanup_expired_sessions(&self) -> HexaResult<usize> {
        let now = Utc::now();
        self.store.mutate(|records| {
            let mut stale = Vec::new();
            for (key, raw) in records.iter() {
                if !decode(key, raw)?.is_live(now) {
                    stale.push(key.clone());
                }
            }

            for key in &stale {
                records.remove(key);
            }
            Ok(stale.len())
        })
    }

    /// Live sessions for one user
    pub fn user_sessions(&self, user_id: &str) -> HexaResult<Vec<Session>> {
        let now = Utc::now();
        let filters = FilterSet::new().and(FilterExpr::eq("userId", user_id));
        Ok(self
            .store
            .find_typed::<Session>(&filters)?
            .into_iter()
            .filter(|s| s.is_live(now))
            .collect())
    }

    fn deactivate(&self, predicate: impl Fn(&Session) -> bool) -> HexaResult<usize> {
        let now = Utc::now();
        self.store.mutate(|records| {
            let mut count = 0;
            for (key, raw) in records.iter_mut() {
                let mut session = decode(key, raw)?;
                if !session.is_active || !predicate(&session) {
                    continue;
                }
                session.is_active = false;
                session.last_activity = now;
                *raw = to_record(&session)?;
                count += 1;
            }
            Ok(count)
        })
    }
}

/// A record that does not fit `Session` is an integrity failure
fn decode(key: &str, raw: &Value) -> HexaResult<Session> {
    serde_json::from_value(raw.clone()).map_err(|e| {
        HexaError::integrity(naming::SESSIONS, format!("record {} has unexpected shape: {}", key, e))
    })
}

fn to_record(session: &Session) -> HexaResult<Value> {
    serde_json::to_value(session)
        .map_err(|e| HexaError::internal(format!("serialize session: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KeyManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, ttl: Duration) -> SessionManager {
        let keys = Arc::new(KeyManager::generate().unwrap());
        let storage = Storage::open(dir.path(), keys).unwrap();
        SessionManager::open(&storage, SessionConfig { ttl }).unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, Duration::hours(1));

        let created = sessions.create_session("user_1", ClientInfo::default()).unwrap();
        let fetched = sessions.get_session(&created.id).unwrap().unwrap();

        assert_eq!(fetched.user_id, "user_1");
        assert!(fetched.last_activity >= created.last_activity);
        assert!(sessions.get_session("session_missing").unwrap().is_none());
    }

    #[test]
    fn test_expired_session_is_deactivated() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, Duration::seconds(-1));

        let created = sessions.create_session("user_1", ClientInfo::default()).unwrap();
        assert!(sessions.get_session(&created.id).unwrap().is_none());
        assert_eq!(sessions.cleanup_expired_sessions().unwrap(), 1);
        assert!(sessions.user_sessions("user_1").unwrap().is_empty());
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, Duration::hours(1));

        let a = sessions.create_session("user_1", ClientInfo::default()).unwrap();
        sessions.create_session("user_1", ClientInfo::default()).unwrap();
        sessions.create_session("user_2", ClientInfo::default()).unwrap();

        assert!(sessions.invalidate_session(&a.id).unwrap());
        assert!(sessions.get_session(&a.id).unwrap().is_none());
        assert_eq!(sessions.user_sessions("user_1").unwrap().len(), 1);

        assert_eq!(sessions.invalidate_all_user_sessions("user_1").unwrap(), 1);
        assert!(sessions.user_sessions("user_1").unwrap().is_empty());
        assert_eq!(sessions.user_sessions("user_2").unwrap().len(), 1);
    }

    #[test]
    fn test_lookup_does_not_write() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, Duration::hours(1));

        assert!(sessions.get_session("session_missing").unwrap().is_none());
        assert!(!sessions.store.exists());

        let created = sessions.create_session("user_1", ClientInfo::default()).unwrap();
        sessions.invalidate_session(&created.id).unwrap();
        let before = std::fs::read(sessions.store.path()).unwrap();
        assert!(sessions.get_session(&created.id).unwrap().is_none());
        assert!(sessions.get_session("session_missing").unwrap().is_none());
        assert_eq!(std::fs::read(sessions.store.path()).unwrap(), before);
    }

    #[test]
    fn test_malformed_session_is_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, Duration::hours(1));
        sessions.create_session("user_1", ClientInfo::default()).unwrap();
        sessions
            .store
            .save("session_bad", &serde_json::json!({ "userId": 7 }))
            .unwrap();

        assert!(matches!(
            sessions.get_session("session_bad"),
            Err(HexaError::IntegrityFailure { .. })
        ));
        assert!(matches!(
            sessions.invalidate_all_user_sessions("user_1"),
            Err(HexaError::IntegrityFailure { .. })
        ));
        assert!(matches!(
            sessions.cleanup_expired_sessions(),
            Err(HexaError::IntegrityFailure { .. })
        ));
    }
}
