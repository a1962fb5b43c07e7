//! # Identity and Authorization
//!
//! Roles, the authorization guard, users, sessions, JWT credentials and
//! the audit trail.

pub mod audit;
pub mod guard;
pub mod jwt;
pub mod role;
mod service;
pub mod session;
pub mod user;

pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use guard::{Acl, Action, Actor, AuthorizationGuard, Resource, ResourceKind, RoleChangeRule, ROLE_CHANGE_RULES};
pub use jwt::{Claims, JwtConfig, JwtManager};
pub use role::{has_permission, Role};
pub use service::{AuthConfig, AuthService, LoginOutcome};
pub use session::{ClientInfo, Session, SessionConfig, SessionManager};
pub use user::{User, UserDirectory, UserProfile};
