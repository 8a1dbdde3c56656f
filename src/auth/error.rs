//! Error taxonomy for the authentication engine.
//!
//! Every failure an orchestrator can return is an [`AuthError`]. Each variant
//! belongs to exactly one [`ErrorKind`], which drives both the HTTP status and
//! the logging policy: expected outcomes (validation, token, conflict,
//! authentication, authorization, rate limiting) are returned to the caller and
//! never logged as errors. Only `Internal` is logged at error level.
//!
//! Token failures deliberately share one message ("invalid or expired token")
//! so callers cannot tell expired, unknown and already consumed tokens apart.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Token,
    RateLimited,
    Conflict,
    DependencyFailure,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::Token => "TOKEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::Conflict => "CONFLICT",
            Self::DependencyFailure => "DEPENDENCY_FAILURE",
            Self::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("password does not meet the password policy")]
    InvalidPassword,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email address has not been verified")]
    EmailNotVerified,

    #[error("invalid service token")]
    InvalidServiceToken,

    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid CSRF token")]
    InvalidCsrfToken,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("registration is disabled")]
    RegistrationDisabled,

    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("invite has expired")]
    InviteExpired,

    #[error("invite was not found")]
    InviteNotFound,

    #[error("invite has already been accepted")]
    InviteAlreadyAccepted,

    #[error("email address is already in use")]
    EmailAlreadyUsed,

    #[error("initial administrator has already been created")]
    InitialAdminAlreadyCreated,

    #[error("too many attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::InvalidPassword => ErrorKind::Validation,
            Self::InvalidCredentials
            | Self::EmailNotVerified
            | Self::InvalidServiceToken
            | Self::Unauthenticated => ErrorKind::Authentication,
            Self::InvalidCsrfToken | Self::Forbidden | Self::RegistrationDisabled => {
                ErrorKind::Authorization
            }
            Self::InvalidOrExpiredToken | Self::InviteExpired | Self::InviteNotFound => {
                ErrorKind::Token
            }
            Self::InviteAlreadyAccepted
            | Self::EmailAlreadyUsed
            | Self::InitialAdminAlreadyCreated => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code returned to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::InvalidServiceToken => "INVALID_SERVICE_TOKEN",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidCsrfToken => "INVALID_CSRF_TOKEN",
            Self::Forbidden => "FORBIDDEN",
            Self::RegistrationDisabled => "REGISTRATION_DISABLED",
            Self::InvalidOrExpiredToken => "INVALID_OR_EXPIRED_TOKEN",
            Self::InviteExpired => "INVITE_EXPIRED",
            Self::InviteNotFound => "INVITE_NOT_FOUND",
            Self::InviteAlreadyAccepted => "INVITE_ALREADY_ACCEPTED",
            Self::EmailAlreadyUsed => "EMAIL_ALREADY_USED",
            Self::InitialAdminAlreadyCreated => "INITIAL_ADMIN_ALREADY_CREATED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Token => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::DependencyFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        let field = match err {
            AuthError::Validation { field, .. } => Some((*field).to_string()),
            _ => None,
        };
        Self {
            error: ErrorBody {
                code: err.code().to_string(),
                kind: err.kind(),
                message: err.to_string(),
                field,
            },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("request failed: {err:#}");
        }

        let status = self.status();
        let body = ErrorResponse::from(&self);
        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_share_one_message() {
        assert_eq!(
            AuthError::InvalidOrExpiredToken.to_string(),
            "invalid or expired token"
        );
        assert_eq!(AuthError::InvalidOrExpiredToken.kind(), ErrorKind::Token);
    }

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(AuthError::InvalidPassword.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::EmailAlreadyUsed.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited {
                retry_after_secs: 3
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn invite_already_accepted_is_conflict() {
        assert_eq!(
            AuthError::InviteAlreadyAccepted.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            AuthError::InviteAlreadyAccepted.code(),
            "INVITE_ALREADY_ACCEPTED"
        );
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = AuthError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[test]
    fn validation_body_carries_field() {
        let err = AuthError::validation("email", "is required");
        let body = ErrorResponse::from(&err);
        assert_eq!(body.error.field.as_deref(), Some("email"));
        assert_eq!(body.error.code, "VALIDATION_FAILED");
        assert_eq!(body.error.message, "email: is required");
    }
}
