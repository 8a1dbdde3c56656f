//! First administrator bootstrap.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::types::{BootstrapStatus, UserResponse};
use super::{body, guard};
use crate::auth::{
    AuthResult, AuthState, bootstrap,
    csrf::ACTION_BOOTSTRAP,
    error::ErrorResponse,
    rate_limit::RateLimitAction,
    validation::RegisterRequest,
};

#[utoipa::path(
    get,
    path = "/bootstrap",
    responses(
        (status = 200, description = "Whether the first administrator still has to be created", body = BootstrapStatus)
    ),
    tag = "bootstrap"
)]
pub async fn status(state: Extension<Arc<AuthState>>) -> AuthResult<Json<BootstrapStatus>> {
    Ok(Json(BootstrapStatus {
        needs_bootstrap: bootstrap::needs_bootstrap(&state).await?,
    }))
}

/// Create the first administrator. Only possible while no user exists.
#[utoipa::path(
    post,
    path = "/bootstrap",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Administrator created", body = UserResponse),
        (status = 400, description = "Invalid input or password policy violation", body = ErrorResponse),
        (status = 409, description = "Initial administrator already created", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "bootstrap"
)]
pub async fn create_admin(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> AuthResult<(StatusCode, Json<UserResponse>)> {
    guard(&state, &headers, RateLimitAction::Bootstrap, ACTION_BOOTSTRAP)?;
    let user = bootstrap::create_initial_admin(&state, &body(payload)).await?;
    Ok((StatusCode::CREATED, Json((&user).into())))
}
