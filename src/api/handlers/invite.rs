//! Invite endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::types::{InviteResponse, UserResponse};
use super::{access_claims, body, guard};
use crate::auth::{
    AuthResult, AuthState,
    csrf::{ACTION_INVITE, ACTION_INVITE_COMPLETE},
    error::ErrorResponse,
    invite,
    rate_limit::RateLimitAction,
    validation::{InviteCompleteRequest, InviteRequest},
};

/// Invite an email address. Administrators only.
#[utoipa::path(
    post,
    path = "/invite",
    request_body = InviteRequest,
    responses(
        (status = 201, description = "Invite created; `warnings` lists notification problems", body = InviteResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "invite"
)]
pub async fn create_invite(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<InviteRequest>>,
) -> AuthResult<(StatusCode, Json<InviteResponse>)> {
    guard(&state, &headers, RateLimitAction::Invite, ACTION_INVITE)?;
    let claims = access_claims(&state, &headers)?;
    let invited = invite::create_invite(&state, &claims, &body(payload)).await?;
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse::new(&invited.invite, invited.delivery)),
    ))
}

/// Accept an invite and set a password.
#[utoipa::path(
    post,
    path = "/invite/complete",
    request_body = InviteCompleteRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token for `invite_complete`")
    ),
    responses(
        (status = 200, description = "Invite accepted", body = UserResponse),
        (status = 400, description = "Invalid input, unknown or expired invite", body = ErrorResponse),
        (status = 409, description = "Invite already accepted", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "invite"
)]
pub async fn complete_invite(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<InviteCompleteRequest>>,
) -> AuthResult<Json<UserResponse>> {
    guard(
        &state,
        &headers,
        RateLimitAction::InviteComplete,
        ACTION_INVITE_COMPLETE,
    )?;
    let user = invite::complete_invite(&state, &body(payload)).await?;
    Ok(Json((&user).into()))
}
