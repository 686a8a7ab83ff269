//! HS256 JWT issuance and verification over a single server-wide secret.
//!
//! The teacher's `r2e-security::jwt` validator is built around a `KeySource`
//! (JWKS or static key) and an allowed-algorithm list, because it serves
//! multi-tenant OIDC deployments. This gateway has exactly one symmetric
//! secret configured at startup (`JWT_SECRET_KEY`), so the validator below
//! keeps the teacher's instrumentation and error-mapping idiom but drops the
//! key-rotation and multi-algorithm machinery entirely.

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::SecurityError;
use crate::models::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub exp: i64,
}

pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: ChronoDuration,
    refresh_ttl: ChronoDuration,
}

impl JwtValidator {
    pub fn new(secret: &str, access_minutes: i64, refresh_days: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: ChronoDuration::minutes(access_minutes),
            refresh_ttl: ChronoDuration::days(refresh_days),
        }
    }

    pub fn issue(&self, user_id: &str, username: &str, role: UserRole, token_type: TokenType) -> Result<String, SecurityError> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            role,
            token_type,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SecurityError::Internal(e.to_string()))
    }

    /// Decode, verify signature and expiry, and reject on a token-type
    /// mismatch (an access token presented where a refresh token is
    /// expected, or vice versa).
    pub fn verify(&self, token: &str, expected_type: TokenType) -> Result<Claims, SecurityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            warn!(error = %e, "jwt validation failed");
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => SecurityError::Expired,
                _ => SecurityError::InvalidCredential("malformed or invalid token".into()),
            }
        })?;

        if data.claims.token_type != expected_type {
            return Err(SecurityError::InvalidCredential("unexpected token type".into()));
        }

        debug!(user_id = %data.claims.user_id, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_access_token() {
        let validator = JwtValidator::new("test-secret", 15, 7);
        let token = validator.issue("u1", "alice", UserRole::User, TokenType::Access).unwrap();
        let claims = validator.verify(&token, TokenType::Access).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_wrong_token_type() {
        let validator = JwtValidator::new("test-secret", 15, 7);
        let token = validator.issue("u1", "alice", UserRole::User, TokenType::Refresh).unwrap();
        let result = validator.verify(&token, TokenType::Access);
        assert!(matches!(result, Err(SecurityError::InvalidCredential(_))));
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let issuer = JwtValidator::new("secret-a", 15, 7);
        let verifier = JwtValidator::new("secret-b", 15, 7);
        let token = issuer.issue("u1", "alice", UserRole::User, TokenType::Access).unwrap();
        let result = verifier.verify(&token, TokenType::Access);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let validator = JwtValidator::new("test-secret", -1, 7);
        let token = validator.issue("u1", "alice", UserRole::User, TokenType::Access).unwrap();
        let result = validator.verify(&token, TokenType::Access);
        assert!(matches!(result, Err(SecurityError::Expired)));
    }
}
