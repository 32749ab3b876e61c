use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use saathi_proto::UserId;

use crate::error::ApiError;
use crate::token::{bearer, verify_token};
use crate::AppState;

/// Caller identity taken from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub is_admin: bool,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer)
            .ok_or(ApiError::MissingToken)?;
        let claims = verify_token(&state.config.jwt_secret, token)?;
        Ok(Self {
            user_id: claims.user_id,
            is_admin: claims.is_admin,
        })
    }
}

/// Like [`AuthUser`], but rejects non-admin tokens with 403.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(Self(user))
    }
}
