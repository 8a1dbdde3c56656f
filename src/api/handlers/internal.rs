//! Service-to-service endpoints, authenticated with the shared service token.

use axum::{Json, extract::Extension, http::HeaderMap};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::service_token;
use crate::auth::{AuthResult, AuthState, error::ErrorResponse};
use crate::store::PurgeReport;

/// Delete expired refresh tokens and spent one-time tokens.
#[utoipa::path(
    post,
    path = "/internal/tokens/purge",
    params(
        ("X-Service-Token" = String, Header, description = "Shared service token")
    ),
    responses(
        (status = 200, description = "Rows removed", body = PurgeReport),
        (status = 401, description = "Invalid service token", body = ErrorResponse)
    ),
    tag = "internal"
)]
pub async fn purge_tokens(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
) -> AuthResult<Json<PurgeReport>> {
    let identity = state
        .service_tokens()
        .authenticate(service_token(&headers).as_deref())?;
    let report = state.store().purge_expired(Utc::now()).await?;
    info!(
        caller = identity.name,
        refresh_tokens = report.refresh_tokens,
        action_tokens = report.action_tokens,
        "purged expired tokens"
    );
    Ok(Json(report))
}
