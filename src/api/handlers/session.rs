//! Login, refresh, logout and the current user.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::types::{SessionResponse, UserResponse};
use super::{access_claims, body, guard, rate_limit};
use crate::auth::{
    AuthError, AuthResult, AuthState, authenticator,
    csrf::{ACTION_AUTHENTICATE, ACTION_LOGOUT, ACTION_REFRESH},
    error::ErrorResponse,
    rate_limit::RateLimitAction,
    refresh,
    roles::{Action, can_access},
    validation::{LoginRequest, LogoutRequest, RefreshRequest, normalize_email},
};

/// Authenticate with email and password.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `authenticate`")
    ),
    responses(
        (status = 200, description = "Authenticated", body = SessionResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Invalid credentials or email not verified", body = ErrorResponse),
        (status = 403, description = "Invalid CSRF token", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "session"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> AuthResult<Json<SessionResponse>> {
    guard(&state, &headers, RateLimitAction::Authenticate, ACTION_AUTHENTICATE)?;
    let request = body(payload);

    // Per-account limit on top of the per-client one.
    let email_key = request.email.as_deref().map(normalize_email);
    if let Some(email) = email_key.as_deref() {
        rate_limit(&state, RateLimitAction::Authenticate, email)?;
    }

    let session = authenticator::authenticate(&state, &request).await?;
    if let Some(email) = email_key.as_deref() {
        state
            .rate_limiter()
            .reset(RateLimitAction::Authenticate, email);
    }
    Ok(Json(session.into()))
}

/// Rotate a refresh token.
#[utoipa::path(
    post,
    path = "/token/refresh",
    request_body = RefreshRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `refresh`")
    ),
    responses(
        (status = 200, description = "New token pair", body = SessionResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "session"
)]
pub async fn refresh_token(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> AuthResult<Json<SessionResponse>> {
    guard(&state, &headers, RateLimitAction::Refresh, ACTION_REFRESH)?;
    let presented = body(payload).validate()?;
    let session = refresh::rotate(&state, &presented).await?;
    Ok(Json(session.into()))
}

/// Revoke the presented refresh token, or every token of its owner.
#[utoipa::path(
    post,
    path = "/logout",
    request_body = LogoutRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `logout`")
    ),
    responses(
        (status = 204, description = "Logged out"),
        (status = 400, description = "Missing refresh token", body = ErrorResponse)
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> AuthResult<impl IntoResponse> {
    guard(&state, &headers, RateLimitAction::Logout, ACTION_LOGOUT)?;
    let request = body(payload);
    let presented = request.validate()?;
    refresh::logout(&state, &presented, request.everywhere).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current user, from the bearer access token.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "session"
)]
pub async fn me(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
) -> AuthResult<Json<UserResponse>> {
    let claims = access_claims(&state, &headers)?;
    let user_id = claims.user_id()?;
    let user = state
        .store()
        .find_user_by_id(user_id)
        .await?
        .ok_or(AuthError::Unauthenticated)?;
    if !can_access(&user.roles, user_id, Some(user.id), Action::Read) {
        return Err(AuthError::Forbidden);
    }
    Ok(Json((&user).into()))
}
