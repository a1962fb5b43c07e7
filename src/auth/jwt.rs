//! # JWT Tokens
//!
//! HS256 credentials carrying the user id, email, role and display name.
//! Validation is stateless.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::{HexaError, HexaResult};

use super::role::Role;
use super::user::User;

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    pub iss: String,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl: Duration,
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "hexabase-default-secret-change-in-production".to_string(),
            ttl: Duration::hours(24),
            issuer: "hexabase".to_string(),
        }
    }
}

/// Signs and validates tokens
#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Issue a token for `user`
    pub fn issue(&self, user: &User) -> HexaResult<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
            iat: now.timestamp(),
            exp: (now + self.config.ttl).timestamp(),
            iss: self.config.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| HexaError::internal(format!("token generation failed: {}", e)))
    }

    /// Validate signature, issuer and expiry
    pub fn verify(&self, token: &str) -> HexaResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    HexaError::Token("token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    HexaError::Token("invalid signature".to_string())
                }
                _ => HexaError::Token("malformed token".to_string()),
            })
    }
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.config.issuer)
            .field("ttl", &self.config.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(secret: &str, ttl: Duration) -> JwtManager {
        JwtManager::new(JwtConfig {
            secret: secret.to_string(),
            ttl,
            issuer: "test".to_string(),
        })
    }

    fn user() -> User {
        User::new("Ada", "ada@example.com", "00".to_string(), "00".to_string(), Role::Admin)
    }

    #[test]
    fn test_issue_and_verify() {
        let jwt = manager("test_secret", Duration::hours(1));
        let user = user();

        let claims = jwt.verify(&jwt.issue(&user).unwrap()).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.name, "Ada");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = manager("one", Duration::hours(1)).issue(&user()).unwrap();
        let result = manager("two", Duration::hours(1)).verify(&token);
        assert!(matches!(result, Err(HexaError::Token(_))));
    }

    #[test]
    fn test_expired_rejected() {
        let jwt = manager("test_secret", Duration::hours(-2));
        let token = jwt.issue(&user()).unwrap();
        assert!(matches!(jwt.verify(&token), Err(HexaError::Token(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let jwt = manager("test_secret", Duration::hours(1));
        assert!(jwt.verify("not.a.token").is_err());
    }
}
