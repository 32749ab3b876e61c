//! Bearer tokens shared by the HTTP API and the realtime relay.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use saathi_proto::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long an issued token stays valid.
pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token required")]
    Missing,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("Invalid token")]
    BadSubject,
    #[error("failed to issue token: {0}")]
    Issue(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: UserId,
    pub is_admin: bool,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: UserId, is_admin: bool, ttl: Duration) -> Self {
        Self {
            user_id,
            is_admin,
            exp: (Utc::now() + ttl).timestamp(),
        }
    }

    pub fn encode(&self, secret: &str) -> Result<String, TokenError> {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(TokenError::Issue)
    }
}

/// Issue a token valid for [`TOKEN_TTL_HOURS`].
pub fn issue_token(secret: &str, user_id: UserId, is_admin: bool) -> Result<String, TokenError> {
    Claims::new(user_id, is_admin, Duration::hours(TOKEN_TTL_HOURS)).encode(secret)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, TokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Missing);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let decoded = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid(e),
    })?;

    if decoded.claims.user_id <= 0 {
        return Err(TokenError::BadSubject);
    }
    Ok(decoded.claims)
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
