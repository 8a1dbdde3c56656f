//! Invite-based onboarding.
//!
//! An administrator invites an email address. Completing the invite sets a
//! password and yields a verified account, creating it if needed. An invite
//! is accepted at most once and only before it expires.

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::password::{hash_password, meets_policy};
use super::roles::{Action, Role, Roles, can_access};
use super::state::AuthState;
use super::token::{AccessClaims, generate_token, hash_token};
use super::validation::{InviteCompleteRequest, InviteRequest};
use crate::notify::{Delivery, Notification, TEMPLATE_INVITE};
use crate::store::{AcceptInviteOutcome, InsertOutcome, InviteUser, User};

#[derive(Debug, Clone)]
pub struct Invited {
    pub invite: InviteUser,
    pub delivery: Delivery,
}

/// Create an invite and email its link.
///
/// # Errors
/// `Forbidden` unless the actor may invite; `Validation` for a bad email.
#[instrument(skip_all)]
pub async fn create_invite(
    state: &AuthState,
    actor: &AccessClaims,
    request: &InviteRequest,
) -> AuthResult<Invited> {
    let actor_id = actor.user_id()?;
    if !can_access(&actor.roles(), actor_id, None, Action::Invite) {
        return Err(AuthError::Forbidden);
    }
    let email = request.validate()?;

    let mut roles = Roles::from_strings(&request.roles);
    if !roles.contains(Role::User) {
        roles = Roles::new(roles.iter().chain([Role::User]));
    }

    let now = Utc::now();
    let raw = generate_token()?;
    let invite = InviteUser {
        id: Uuid::now_v7(),
        email,
        token_hash: hash_token(&raw),
        roles,
        invited_by: Some(actor_id),
        created_at: now,
        expires_at: now + Duration::seconds(state.config().invite_ttl_seconds()),
        accepted_at: None,
    };
    state.store().insert_invite(&invite).await?;
    info!(invite_id = %invite.id, invited_by = %actor_id, "invite created");

    let notification = Notification::new(&invite.email, TEMPLATE_INVITE)
        .with("invite_url", state.config().frontend_link("invite", &raw))
        .with("expires_at", invite.expires_at.to_rfc3339());
    let delivery = state.dispatcher().dispatch(&notification).await;
    Ok(Invited { invite, delivery })
}

/// Accept an invite and activate the invited account.
///
/// # Errors
/// `Validation`, `InvalidPassword`, `InviteNotFound`, `InviteExpired` or
/// `InviteAlreadyAccepted`.
#[instrument(skip_all)]
pub async fn complete_invite(
    state: &AuthState,
    request: &InviteCompleteRequest,
) -> AuthResult<User> {
    let input = request.validate()?;
    if !meets_policy(&input.password, state.config().password_policy()) {
        return Err(AuthError::InvalidPassword);
    }
    let password_hash = hash_password(&input.password)?;

    let now = Utc::now();
    let invite = match state
        .store()
        .accept_invite(&hash_token(&input.token), now)
        .await?
    {
        AcceptInviteOutcome::Accepted(invite) => invite,
        AcceptInviteOutcome::NotFound => return Err(AuthError::InviteNotFound),
        AcceptInviteOutcome::Expired => return Err(AuthError::InviteExpired),
        AcceptInviteOutcome::AlreadyAccepted => return Err(AuthError::InviteAlreadyAccepted),
    };

    if let Some(existing) = state.store().find_user_by_email(&invite.email).await? {
        return activate(state, existing.id, &invite, &password_hash).await;
    }

    let mut user = User::create(
        invite.email.clone(),
        password_hash.clone(),
        invite.roles.clone(),
        now,
    );
    user.mark_verified(now);
    match state.store().insert_user(&user).await? {
        InsertOutcome::Inserted => {
            info!(user_id = %user.id, invite_id = %invite.id, "invite completed");
            Ok(user)
        }
        InsertOutcome::Conflict => {
            // Registered between the lookup and the insert.
            let Some(existing) = state.store().find_user_by_email(&invite.email).await? else {
                warn!(invite_id = %invite.id, "invited account vanished during activation");
                return Err(AuthError::InviteNotFound);
            };
            activate(state, existing.id, &invite, &password_hash).await
        }
    }
}

async fn activate(
    state: &AuthState,
    user_id: Uuid,
    invite: &InviteUser,
    password_hash: &str,
) -> AuthResult<User> {
    let Some(user) = state
        .store()
        .activate_invited(user_id, password_hash, &invite.roles, Utc::now())
        .await?
    else {
        warn!(invite_id = %invite.id, "invited account vanished during activation");
        return Err(AuthError::InviteNotFound);
    };
    info!(user_id = %user.id, invite_id = %invite.id, "invite activated existing account");
    Ok(user)
}
