//! Refresh token issuance, rotation and revocation.
//!
//! A refresh token is single use. Rotation removes the presented row and
//! inserts its successor in one store operation, so a token that has already
//! been rotated (or stolen and replayed) can never succeed twice.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::state::AuthState;
use super::token::{AccessToken, generate_token, hash_token};
use crate::store::{RefreshToken, User};

/// Credentials returned after login or rotation.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub access_token: AccessToken,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

fn refresh_expiry(state: &AuthState, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(state.config().refresh_token_ttl_seconds())
}

/// Record the login of `user` and open a session for it.
///
/// `user` is the record whose password hash was just verified. If the hash
/// changed in the meantime nothing is written and the login is refused.
///
/// # Errors
/// `InvalidCredentials` when the password changed concurrently, internal
/// errors from the RNG, signer or store.
pub(crate) async fn issue_session(state: &AuthState, user: &User) -> AuthResult<Session> {
    let now = Utc::now();
    let raw = generate_token()?;
    let record = RefreshToken {
        token_hash: hash_token(&raw),
        user_id: user.id,
        expires_at: refresh_expiry(state, now),
        created_at: now,
    };
    let Some(user) = state
        .store()
        .record_login(user.id, &user.password_hash, &record, now)
        .await?
    else {
        debug!(user_id = %user.id, "login rejected: password changed during login");
        return Err(AuthError::InvalidCredentials);
    };
    let access_token = state.access_tokens().issue(&user)?;
    Ok(Session {
        user,
        access_token,
        refresh_token: raw,
        refresh_expires_at: record.expires_at,
    })
}

/// Exchange a valid refresh token for a new pair.
///
/// # Errors
/// `InvalidOrExpiredToken` when the token is unknown, expired or already used.
#[instrument(skip_all)]
pub async fn rotate(state: &AuthState, presented: &str) -> AuthResult<Session> {
    let now = Utc::now();
    let raw = generate_token()?;
    let rotated = state
        .store()
        .rotate_refresh_token(
            &hash_token(presented),
            &hash_token(&raw),
            refresh_expiry(state, now),
            now,
        )
        .await?;

    let Some(record) = rotated else {
        debug!("refresh rejected: unknown, expired or already rotated");
        return Err(AuthError::InvalidOrExpiredToken);
    };

    let Some(user) = state.store().find_user_by_id(record.user_id).await? else {
        debug!("refresh rejected: owner no longer exists");
        state.store().delete_refresh_token(&record.token_hash).await?;
        return Err(AuthError::InvalidOrExpiredToken);
    };

    let access_token = state.access_tokens().issue(&user)?;
    Ok(Session {
        user,
        access_token,
        refresh_token: raw,
        refresh_expires_at: record.expires_at,
    })
}

/// Delete every refresh token of `user_id`.
///
/// # Errors
/// Internal store errors.
pub async fn revoke_all(state: &AuthState, user_id: Uuid) -> AuthResult<u64> {
    let revoked = state.store().revoke_refresh_tokens(user_id).await?;
    info!(%user_id, revoked, "revoked refresh tokens");
    Ok(revoked)
}

/// End the session behind `presented`, or all sessions of its owner when
/// `everywhere` is set. Unknown tokens are accepted silently.
///
/// # Errors
/// Internal store errors.
#[instrument(skip(state, presented))]
pub async fn logout(state: &AuthState, presented: &str, everywhere: bool) -> AuthResult<()> {
    let owner = state
        .store()
        .delete_refresh_token(&hash_token(presented))
        .await?;
    match owner {
        Some(user_id) if everywhere => {
            revoke_all(state, user_id).await?;
        }
        Some(_) => {}
        None => debug!("logout with unknown refresh token"),
    }
    Ok(())
}
