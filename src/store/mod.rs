//! Persistence collaborator: data model and the queries the engine needs.
//!
//! The engine never stores raw tokens. Every token-keyed lookup takes the
//! SHA-256 digest of the presented value (see [`crate::auth::token::hash_token`]).
//!
//! Two operations need cross-request mutual exclusion and are expressed as
//! single atomic calls rather than read-then-write sequences:
//! [`Store::rotate_refresh_token`] and [`Store::insert_initial_admin`].
//! [`Store::consume_action_token`] and [`Store::accept_invite`] are conditional
//! updates with the same property.
//!
//! Users are never written back whole. Each mutation touches only its own
//! columns, so a login racing a password reset cannot restore the old hash.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::roles::Roles;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Identity record.
///
/// Timestamps are set by the constructor and by each mutating method; nothing
/// is updated implicitly on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub roles: Roles,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New unverified user. `email` must already be normalized.
    #[must_use]
    pub fn create(email: String, password_hash: String, roles: Roles, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email,
            password_hash,
            roles,
            email_verified: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.email_verified = true;
        self.updated_at = now;
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login_at = Some(now);
        self.updated_at = now;
    }

    pub fn set_password_hash(&mut self, password_hash: String, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.updated_at = now;
    }

    pub fn set_roles(&mut self, roles: Roles, now: DateTime<Utc>) {
        self.roles = roles;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// Single-use, purpose-scoped token for verification and password reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionToken {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteUser {
    pub id: Uuid,
    pub email: String,
    pub token_hash: Vec<u8>,
    pub roles: Roles,
    pub invited_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Result of the guarded first-user insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Inserted,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptInviteOutcome {
    Accepted(InviteUser),
    NotFound,
    Expired,
    AlreadyAccepted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PurgeReport {
    pub refresh_tokens: u64,
    pub action_tokens: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    async fn count_users(&self) -> Result<u64>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Insert a new user; an existing email yields `Conflict`.
    async fn insert_user(&self, user: &User) -> Result<InsertOutcome>;

    /// Insert `user` only while no user exists at all.
    async fn insert_initial_admin(&self, user: &User) -> Result<BootstrapOutcome>;

    /// Stamp `last_login_at` and store `refresh` as one step, but only while
    /// the password hash still equals `verified_hash`. Returns the updated
    /// user, or `None` when the account is gone or its password changed after
    /// it was checked.
    async fn record_login(
        &self,
        user_id: Uuid,
        verified_hash: &str,
        refresh: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<User>>;

    /// Set `email_verified`.
    async fn mark_verified(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>>;

    /// Replace the password hash and delete every refresh token of the user.
    async fn replace_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>>;

    /// Activate an invited account: new password hash, `roles` added to the
    /// existing ones, email verified and refresh tokens revoked.
    async fn activate_invited(
        &self,
        user_id: Uuid,
        password_hash: &str,
        roles: &Roles,
        now: DateTime<Utc>,
    ) -> Result<Option<User>>;

    async fn insert_action_token(&self, token: &ActionToken) -> Result<()>;

    /// Mark an unconsumed, unexpired token of `purpose` as consumed and return
    /// its owner. Any other state yields `None`.
    async fn consume_action_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>>;

    /// Creation time of the newest token of `purpose` for `user_id`.
    async fn latest_action_token_at(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Remove the presented token if it is still valid and insert its
    /// replacement for the same owner, as one atomic step. Returns the new
    /// record, or `None` when the presented token was unknown, expired or
    /// already rotated.
    async fn rotate_refresh_token(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        replacement_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>>;

    /// Delete one refresh token and return its owner.
    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<Option<Uuid>>;

    /// Delete every refresh token of `user_id`.
    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64>;

    async fn insert_invite(&self, invite: &InviteUser) -> Result<()>;

    /// Set `accepted_at` if the invite exists, is unaccepted and unexpired.
    async fn accept_invite(&self, token_hash: &[u8], now: DateTime<Utc>)
    -> Result<AcceptInviteOutcome>;

    /// Delete expired refresh tokens and expired or consumed action tokens.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport>;
}
