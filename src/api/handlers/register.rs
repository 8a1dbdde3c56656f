//! Registration and email verification endpoints.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::types::{MessageResponse, RegisterResponse, UserResponse};
use super::{body, client_fingerprint, guard, rate_limit};
use crate::auth::{
    AuthResult, AuthState,
    csrf::{ACTION_REGISTER, ACTION_RESEND_VERIFICATION},
    error::ErrorResponse,
    rate_limit::RateLimitAction,
    registration,
    validation::{EmailRequest, RegisterRequest, VerifyEmailQuery},
    verification,
};

const RESEND_MESSAGE: &str =
    "If the address belongs to an unverified account, a new verification email is on its way.";

/// Create an account and send a verification email.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `register`")
    ),
    responses(
        (status = 201, description = "Account created; `warnings` lists notification problems", body = RegisterResponse),
        (status = 400, description = "Invalid input or password policy violation", body = ErrorResponse),
        (status = 403, description = "Registration disabled or invalid CSRF token", body = ErrorResponse),
        (status = 409, description = "Email already used", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "registration"
)]
pub async fn register(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> AuthResult<(StatusCode, Json<RegisterResponse>)> {
    guard(&state, &headers, RateLimitAction::Register, ACTION_REGISTER)?;
    let registered = registration::register(&state, &body(payload)).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse::new(&registered.user, registered.delivery)),
    ))
}

/// Consume an email verification token.
#[utoipa::path(
    get,
    path = "/verify-email",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified", body = UserResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "registration"
)]
pub async fn verify_email(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    Query(query): Query<VerifyEmailQuery>,
) -> AuthResult<Json<UserResponse>> {
    rate_limit(&state, RateLimitAction::VerifyEmail, &client_fingerprint(&state, &headers))?;
    let user = verification::verify_email(&state, &query).await?;
    Ok(Json((&user).into()))
}

/// Resend the verification email. The answer never depends on the account.
#[utoipa::path(
    post,
    path = "/verify-email/resend",
    request_body = EmailRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `resend_verification`")
    ),
    responses(
        (status = 202, description = "Resend accepted", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "registration"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailRequest>>,
) -> AuthResult<(StatusCode, Json<MessageResponse>)> {
    guard(
        &state,
        &headers,
        RateLimitAction::ResendVerification,
        ACTION_RESEND_VERIFICATION,
    )?;
    let request = body(payload);
    if let Ok(email) = request.validate() {
        rate_limit(&state, RateLimitAction::ResendVerification, &email)?;
    }
    verification::resend_verification(&state, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(MessageResponse::new(RESEND_MESSAGE))))
}
