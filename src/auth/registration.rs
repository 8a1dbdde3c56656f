//! Self-service registration.

use chrono::Utc;
use tracing::{info, instrument};

use super::error::{AuthError, AuthResult};
use super::password::{hash_password, meets_policy};
use super::roles::Roles;
use super::state::AuthState;
use super::validation::{NewAccount, RegisterRequest};
use super::verification::send_verification;
use crate::notify::Delivery;
use crate::store::{InsertOutcome, User};

#[derive(Debug, Clone)]
pub struct Registered {
    pub user: User,
    pub delivery: Delivery,
}

/// Validate the request, enforce the password policy and build an unsaved,
/// unverified `ROLE_USER` account.
pub(crate) fn prepare_account(state: &AuthState, request: &RegisterRequest) -> AuthResult<User> {
    let NewAccount { email, password } = request.validate()?;
    if !meets_policy(&password, state.config().password_policy()) {
        return Err(AuthError::InvalidPassword);
    }
    let password_hash = hash_password(&password)?;
    Ok(User::create(email, password_hash, Roles::user(), Utc::now()))
}

/// Create an unverified account and send its verification email.
///
/// A failed email does not undo the registration; it is reported through
/// [`Registered::delivery`].
///
/// # Errors
/// `RegistrationDisabled`, `Validation`, `InvalidPassword` or
/// `EmailAlreadyUsed`.
#[instrument(skip_all)]
pub async fn register(state: &AuthState, request: &RegisterRequest) -> AuthResult<Registered> {
    if !state.config().registration_enabled() {
        return Err(AuthError::RegistrationDisabled);
    }

    if let Some(email) = request.email.as_deref() {
        let normalized = super::validation::normalize_email(email);
        if state.store().find_user_by_email(&normalized).await?.is_some() {
            return Err(AuthError::EmailAlreadyUsed);
        }
    }

    let user = prepare_account(state, request)?;
    if state.store().insert_user(&user).await? == InsertOutcome::Conflict {
        return Err(AuthError::EmailAlreadyUsed);
    }
    info!(user_id = %user.id, "user registered");

    let delivery = send_verification(state, &user).await?;
    Ok(Registered { user, delivery })
}
