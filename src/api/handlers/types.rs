//! Response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Session;
use crate::notify::{Delivery, Warning};
use crate::store::{InviteUser, User};

const TOKEN_TYPE: &str = "Bearer";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            roles: user.roles.to_strings(),
            email_verified: user.email_verified,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RegisterResponse {
    pub user: UserResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl RegisterResponse {
    pub(crate) fn new(user: &User, delivery: Delivery) -> Self {
        Self {
            user: user.into(),
            warnings: delivery.warnings(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            access_token: session.access_token.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: session.access_token.expires_in,
            refresh_token: session.refresh_token,
            refresh_expires_at: session.refresh_expires_at,
            user: (&session.user).into(),
        }
    }
}

/// Body for endpoints that answer identically whatever happened.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct InviteResponse {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl InviteResponse {
    pub(crate) fn new(invite: &InviteUser, delivery: Delivery) -> Self {
        Self {
            id: invite.id.to_string(),
            email: invite.email.clone(),
            roles: invite.roles.to_strings(),
            expires_at: invite.expires_at,
            warnings: delivery.warnings(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BootstrapStatus {
    pub needs_bootstrap: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CsrfResponse {
    pub action: String,
    pub token: String,
    pub header: String,
    pub expires_in: i64,
}
