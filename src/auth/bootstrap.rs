//! One-time creation of the first administrator.
//!
//! The pre-check is only a fast path. The store insert is the authority: it
//! succeeds only while no user exists, so of two racing requests exactly one
//! creates an administrator.

use chrono::Utc;
use tracing::{info, instrument};

use super::error::{AuthError, AuthResult};
use super::registration::prepare_account;
use super::roles::Roles;
use super::state::AuthState;
use super::validation::RegisterRequest;
use crate::store::{BootstrapOutcome, User};

/// True while the user table is empty.
///
/// # Errors
/// Internal store errors.
pub async fn needs_bootstrap(state: &AuthState) -> AuthResult<bool> {
    Ok(state.store().count_users().await? == 0)
}

/// Create the first account as a verified administrator.
///
/// Registration being disabled does not block this.
///
/// # Errors
/// `InitialAdminAlreadyCreated` once any user exists, plus the registration
/// validation errors.
#[instrument(skip_all)]
pub async fn create_initial_admin(state: &AuthState, request: &RegisterRequest) -> AuthResult<User> {
    if !needs_bootstrap(state).await? {
        return Err(AuthError::InitialAdminAlreadyCreated);
    }

    let mut user = prepare_account(state, request)?;
    let now = Utc::now();
    user.set_roles(Roles::admin(), now);
    user.mark_verified(now);

    match state.store().insert_initial_admin(&user).await? {
        BootstrapOutcome::Inserted => {
            info!(user_id = %user.id, "initial administrator created");
            Ok(user)
        }
        BootstrapOutcome::Closed => Err(AuthError::InitialAdminAlreadyCreated),
    }
}
