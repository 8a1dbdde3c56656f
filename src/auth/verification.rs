//! Email verification tokens: issue, consume and resend.

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument};

use super::error::{AuthError, AuthResult};
use super::state::AuthState;
use super::token::{generate_token, hash_token};
use super::validation::{EmailRequest, VerifyEmailQuery};
use crate::notify::{Delivery, Notification, TEMPLATE_VERIFY_EMAIL};
use crate::store::{ActionToken, TokenPurpose, User};

/// Outcome of a resend request. Callers answer every variant the same way so
/// the response does not reveal whether an account exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    Queued,
    Cooldown,
    Noop,
}

/// Store a new verification token for `user` and build the email carrying
/// the link.
async fn prepare_verification(state: &AuthState, user: &User) -> AuthResult<Notification> {
    let now = Utc::now();
    let raw = generate_token()?;
    state
        .store()
        .insert_action_token(&ActionToken {
            token_hash: hash_token(&raw),
            user_id: user.id,
            purpose: TokenPurpose::EmailVerification,
            expires_at: now + Duration::seconds(state.config().email_token_ttl_seconds()),
            created_at: now,
            consumed_at: None,
        })
        .await?;

    Ok(Notification::new(&user.email, TEMPLATE_VERIFY_EMAIL)
        .with("verify_url", state.config().frontend_link("verify-email", &raw)))
}

/// Store a new verification token for `user` and email the link.
pub(crate) async fn send_verification(state: &AuthState, user: &User) -> AuthResult<Delivery> {
    let notification = prepare_verification(state, user).await?;
    Ok(state.dispatcher().dispatch(&notification).await)
}

/// Consume a verification token and mark its owner verified.
///
/// # Errors
/// `InvalidOrExpiredToken` for unknown, expired, reused or wrong-purpose tokens.
#[instrument(skip_all)]
pub async fn verify_email(state: &AuthState, query: &VerifyEmailQuery) -> AuthResult<User> {
    let token = query.validate()?;
    let now = Utc::now();
    let Some(user_id) = state
        .store()
        .consume_action_token(&hash_token(&token), TokenPurpose::EmailVerification, now)
        .await?
    else {
        debug!("verification rejected: token unknown, expired or consumed");
        return Err(AuthError::InvalidOrExpiredToken);
    };

    let Some(user) = state.store().mark_verified(user_id, now).await? else {
        return Err(AuthError::InvalidOrExpiredToken);
    };
    info!(user_id = %user.id, "email verified");
    Ok(user)
}

/// Send a new verification email to an unverified account, at most once per
/// cooldown period.
///
/// # Errors
/// `Validation` for a malformed email; internal errors otherwise.
#[instrument(skip_all)]
pub async fn resend_verification(
    state: &AuthState,
    request: &EmailRequest,
) -> AuthResult<ResendOutcome> {
    let email = request.validate()?;
    let Some(user) = state.store().find_user_by_email(&email).await? else {
        return Ok(ResendOutcome::Noop);
    };
    if user.email_verified {
        return Ok(ResendOutcome::Noop);
    }

    let latest = state
        .store()
        .latest_action_token_at(user.id, TokenPurpose::EmailVerification)
        .await?;
    let cooldown = Duration::seconds(state.config().resend_cooldown_seconds());
    if latest.is_some_and(|at| Utc::now() - at < cooldown) {
        debug!(user_id = %user.id, "verification resend suppressed by cooldown");
        return Ok(ResendOutcome::Cooldown);
    }

    // Background send keeps the latency independent of the account.
    let notification = prepare_verification(state, &user).await?;
    state.dispatcher().spawn(notification);
    info!(user_id = %user.id, "verification email queued");
    Ok(ResendOutcome::Queued)
}
