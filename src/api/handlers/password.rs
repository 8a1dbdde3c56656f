//! Password reset endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::types::{MessageResponse, UserResponse};
use super::{body, guard, rate_limit};
use crate::auth::{
    AuthResult, AuthState,
    csrf::{ACTION_PASSWORD_REQUEST, ACTION_PASSWORD_RESET},
    error::ErrorResponse,
    rate_limit::RateLimitAction,
    reset,
    validation::{EmailRequest, PasswordResetRequest},
};

const REQUEST_MESSAGE: &str =
    "If the address belongs to an account, a password reset email is on its way.";

/// Request a password reset link. The answer never depends on the account.
#[utoipa::path(
    post,
    path = "/password/request",
    request_body = EmailRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `password_request`")
    ),
    responses(
        (status = 202, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "password"
)]
pub async fn request_reset(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailRequest>>,
) -> AuthResult<(StatusCode, Json<MessageResponse>)> {
    guard(
        &state,
        &headers,
        RateLimitAction::PasswordRequest,
        ACTION_PASSWORD_REQUEST,
    )?;
    let request = body(payload);
    if let Ok(email) = request.validate() {
        rate_limit(&state, RateLimitAction::PasswordRequest, &email)?;
    }
    reset::request_password_reset(&state, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(MessageResponse::new(REQUEST_MESSAGE))))
}

/// Set a new password with a reset token. Signs the user out everywhere.
#[utoipa::path(
    post,
    path = "/password/reset",
    request_body = PasswordResetRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `password_reset`")
    ),
    responses(
        (status = 200, description = "Password updated", body = UserResponse),
        (status = 400, description = "Invalid input, password policy violation, or invalid or expired token", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "password"
)]
pub async fn confirm_reset(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> AuthResult<Json<UserResponse>> {
    guard(
        &state,
        &headers,
        RateLimitAction::PasswordReset,
        ACTION_PASSWORD_RESET,
    )?;
    let user = reset::confirm_password_reset(&state, &body(payload)).await?;
    Ok(Json((&user).into()))
}
