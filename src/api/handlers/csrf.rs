//! CSRF token issuance.
//!
//! Tokens are bound to a random session nonce kept in the `gatehouse_csrf`
//! cookie. The first request mints the nonce; later requests reuse it so
//! tokens fetched for different actions stay valid together.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::types::CsrfResponse;
use super::{cookie_value, session_cookie};
use crate::auth::{
    AuthResult, AuthState,
    csrf::{CSRF_COOKIE, CSRF_HEADER},
    error::ErrorResponse,
    token::{self, MIN_TOKEN_BYTES},
};

#[utoipa::path(
    get,
    path = "/csrf/{action}",
    params(
        ("action" = String, Path, description = "Action the token is for, for example `register`")
    ),
    responses(
        (status = 200, description = "Token issued; the session cookie is set when missing", body = CsrfResponse),
        (status = 403, description = "CSRF protection is not configured", body = ErrorResponse)
    ),
    tag = "csrf"
)]
pub async fn issue(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    Path(action): Path<String>,
) -> AuthResult<Response> {
    let action = action.trim().to_lowercase();
    let existing = cookie_value(&headers, CSRF_COOKIE);
    let session = match &existing {
        Some(session) => session.clone(),
        None => token::generate(MIN_TOKEN_BYTES)?,
    };

    let guard = state.csrf();
    let body = CsrfResponse {
        token: guard.issue(&action, &session)?,
        action,
        header: CSRF_HEADER.to_string(),
        expires_in: guard.ttl_seconds(),
    };

    let mut response = Json(body).into_response();
    if existing.is_none() {
        let cookie = session_cookie(&state, CSRF_COOKIE, &session, guard.ttl_seconds())
            .context("failed to build CSRF cookie")?;
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}
