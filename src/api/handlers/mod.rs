//! HTTP handlers and the request guards they share.
//!
//! Every mutating handler runs the same prelude before touching a flow:
//! rate limit first (so blocked callers cost nothing), then CSRF.

pub mod bootstrap;
pub mod csrf;
pub mod health;
pub mod internal;
pub mod invite;
pub mod password;
pub mod register;
pub mod session;
pub mod types;

use axum::{
    Json,
    http::{
        HeaderMap, HeaderValue,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
    },
};
use tracing::debug;

use crate::auth::{
    AuthError, AuthResult, AuthState,
    csrf::{CSRF_COOKIE, CSRF_HEADER},
    rate_limit::{RateLimitAction, RateLimitDecision},
    token::AccessClaims,
};

const UNKNOWN_CLIENT: &str = "unknown";
const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// Extract a client IP for rate limiting from proxy headers.
///
/// Each of the `trusted_hops` proxies appends the address it received the
/// request from to `X-Forwarded-For`, so the client is the entry `trusted_hops`
/// from the right. Anything further left was supplied by the client. With a
/// shorter chain the left-most entry is used.
pub(crate) fn extract_client_ip(headers: &HeaderMap, trusted_hops: usize) -> Option<String> {
    if trusted_hops == 0 {
        return None;
    }
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let hops: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .collect();
        if let Some(ip) = hops.get(hops.len().saturating_sub(trusted_hops)) {
            return Some((*ip).to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn client_fingerprint(state: &AuthState, headers: &HeaderMap) -> String {
    extract_client_ip(headers, state.config().trusted_proxy_hops())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == name && !val.trim().is_empty()).then(|| val.trim().to_string())
    })
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(crate) fn service_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Missing or unparsable bodies become an empty record so field validation
/// reports what is missing.
pub(crate) fn body<T: Default>(payload: Option<Json<T>>) -> T {
    payload.map(|Json(inner)| inner).unwrap_or_default()
}

/// Count one attempt against `fingerprint`.
pub(crate) fn rate_limit(
    state: &AuthState,
    action: RateLimitAction,
    fingerprint: &str,
) -> AuthResult<()> {
    match state.rate_limiter().check_and_consume(action, fingerprint) {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Blocked { retry_after_secs } => {
            debug!(action = action.as_str(), retry_after_secs, "rate limited");
            Err(AuthError::RateLimited { retry_after_secs })
        }
    }
}

/// Rate limit by client address, then check the CSRF token for `csrf_action`.
pub(crate) fn guard(
    state: &AuthState,
    headers: &HeaderMap,
    action: RateLimitAction,
    csrf_action: &str,
) -> AuthResult<()> {
    rate_limit(state, action, &client_fingerprint(state, headers))?;
    let session = cookie_value(headers, CSRF_COOKIE);
    let supplied = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    state
        .csrf()
        .validate(csrf_action, session.as_deref(), supplied)
}

/// Validate the bearer access token.
pub(crate) fn access_claims(state: &AuthState, headers: &HeaderMap) -> AuthResult<AccessClaims> {
    let token = extract_bearer_token(headers).ok_or(AuthError::Unauthenticated)?;
    state.access_tokens().validate(&token)
}

pub(crate) fn session_cookie(
    state: &AuthState,
    name: &str,
    value: &str,
    ttl_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={ttl_seconds}");
    if state.config().session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
