//! Password reset.
//!
//! Requesting a reset looks the same whether or not the email belongs to an
//! account: a token is always generated, but it is only stored and mailed for
//! real accounts. Confirming a reset revokes every refresh token of the user.

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument};

use super::error::{AuthError, AuthResult};
use super::password::{hash_password, meets_policy};
use super::state::AuthState;
use super::token::{generate_token, hash_token};
use super::validation::{EmailRequest, PasswordResetRequest};
use crate::notify::{Notification, TEMPLATE_PASSWORD_RESET};
use crate::store::{ActionToken, TokenPurpose, User};

/// Start a reset. The result carries no information about the account.
///
/// The email is sent in the background and its outcome is only logged, so
/// neither the latency nor the body of the answer depends on the account.
///
/// # Errors
/// `Validation` for a malformed email; internal errors otherwise.
#[instrument(skip_all)]
pub async fn request_password_reset(state: &AuthState, request: &EmailRequest) -> AuthResult<()> {
    let email = request.validate()?;
    let raw = generate_token()?;
    let token_hash = hash_token(&raw);

    let Some(user) = state.store().find_user_by_email(&email).await? else {
        debug!("password reset requested for unknown email");
        return Ok(());
    };

    let now = Utc::now();
    state
        .store()
        .insert_action_token(&ActionToken {
            token_hash,
            user_id: user.id,
            purpose: TokenPurpose::PasswordReset,
            expires_at: now + Duration::seconds(state.config().reset_token_ttl_seconds()),
            created_at: now,
            consumed_at: None,
        })
        .await?;

    let notification = Notification::new(&user.email, TEMPLATE_PASSWORD_RESET)
        .with("reset_url", state.config().frontend_link("password/reset", &raw));
    state.dispatcher().spawn(notification);
    info!(user_id = %user.id, "password reset requested");
    Ok(())
}

/// Set a new password with a reset token and sign the user out everywhere.
///
/// The password is checked before the token is consumed, so a rejected
/// password leaves the link usable.
///
/// # Errors
/// `Validation`, `InvalidPassword` or `InvalidOrExpiredToken`.
#[instrument(skip_all)]
pub async fn confirm_password_reset(
    state: &AuthState,
    request: &PasswordResetRequest,
) -> AuthResult<User> {
    let input = request.validate()?;
    if !meets_policy(&input.password, state.config().password_policy()) {
        return Err(AuthError::InvalidPassword);
    }
    let password_hash = hash_password(&input.password)?;

    let now = Utc::now();
    let Some(user_id) = state
        .store()
        .consume_action_token(&hash_token(&input.token), TokenPurpose::PasswordReset, now)
        .await?
    else {
        debug!("password reset rejected: token unknown, expired or consumed");
        return Err(AuthError::InvalidOrExpiredToken);
    };

    let Some(user) = state
        .store()
        .replace_password(user_id, &password_hash, now)
        .await?
    else {
        return Err(AuthError::InvalidOrExpiredToken);
    };
    info!(user_id = %user.id, "password reset completed");
    Ok(user)
}
