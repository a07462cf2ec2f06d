use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use crate::{api::AppState, error::AppError, models::User};

/// Authorization schemes accepted in front of a session token
const SCHEMES: [&str; 2] = ["Token", "Bearer"];

/// The user behind the request's session token.
///
/// Handlers that take this extractor reject requests without a valid
/// `Authorization: Token <token>` (or `Bearer <token>`) header with 401.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| {
                AppError::Unauthorized("Authentication credentials were not provided".to_string())
            })?
            .to_string();

        let user = state.accounts.authenticate(&token).await?;
        tracing::debug!(user_uid = %user.uid, "Request authenticated");
        Ok(Self { user, token })
    }
}

/// Extracts the session token from the `Authorization` header
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
