use axum::{extract::State, http::StatusCode};

use crate::{
    api::{
        extract::{Json, Query},
        AppState,
    },
    error::AppResult,
    middleware::AuthUser,
    models::{
        ActivateQuery, AuthResponse, ChangePasswordRequest, Envelope, ForgotPasswordRequest,
        LoginRequest, RegisterRequest, ResetPasswordRequest, UserInfo, UserSummary,
    },
    services::{PageParams, PageResult},
};

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Envelope<()>)> {
    state.accounts.register(request).await?;
    Ok((StatusCode::CREATED, Envelope::empty()))
}

pub async fn activate(
    State(state): State<AppState>,
    Query(query): Query<ActivateQuery>,
) -> AppResult<Envelope<()>> {
    state.accounts.activate(&query.token).await?;
    Ok(Envelope::empty())
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Envelope<AuthResponse>> {
    let response = state.accounts.login(request).await?;
    Ok(Envelope::ok(response))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Envelope<()>> {
    state.accounts.logout(&auth.token).await?;
    tracing::info!(user_uid = %auth.user.uid, "User logged out");
    Ok(Envelope::empty())
}

/// Profile of the calling user
pub async fn infor(auth: AuthUser) -> Envelope<UserInfo> {
    Envelope::ok(UserInfo::from(&auth.user))
}

pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> AppResult<Envelope<PageResult<UserSummary>>> {
    let users = state.accounts.list_users().await?;
    let page = state.paginator.paginate_params(users, &page)?;
    Ok(Envelope::ok(page))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ChangePasswordRequest>,
) -> AppResult<Envelope<()>> {
    state.accounts.change_password(&auth.user, request).await?;
    Ok(Envelope::empty())
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> AppResult<Envelope<()>> {
    state.accounts.forgot_password(request).await?;
    Ok(Envelope::empty())
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> AppResult<Envelope<()>> {
    state.accounts.reset_password(request).await?;
    Ok(Envelope::empty())
}
