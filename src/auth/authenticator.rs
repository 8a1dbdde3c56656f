//! Credential authentication.
//!
//! Unknown emails and wrong passwords produce the same error after the same
//! amount of hashing work. Only a correct password reveals that the email is
//! unverified. A password changed between the check and the write refuses
//! the login.

use tracing::{debug, info, instrument};

use super::error::{AuthError, AuthResult};
use super::password::{verify_against_dummy, verify_password};
use super::refresh::{Session, issue_session};
use super::state::AuthState;
use super::validation::LoginRequest;

/// Verify credentials and open a session.
///
/// # Errors
/// `Validation` for malformed input, `InvalidCredentials` for an unknown email
/// or wrong password, `EmailNotVerified` when the password is right but the
/// address has not been confirmed.
#[instrument(skip_all)]
pub async fn authenticate(state: &AuthState, request: &LoginRequest) -> AuthResult<Session> {
    let credentials = request.validate()?;

    let Some(user) = state.store().find_user_by_email(&credentials.email).await? else {
        verify_against_dummy(&credentials.password);
        debug!("login rejected: unknown email");
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(&credentials.password, &user.password_hash)? {
        debug!(user_id = %user.id, "login rejected: wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    if !user.email_verified {
        return Err(AuthError::EmailNotVerified);
    }

    let session = issue_session(state, &user).await?;
    info!(user_id = %session.user.id, "user authenticated");
    Ok(session)
}
