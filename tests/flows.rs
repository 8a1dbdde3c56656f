//! End-to-end flows against the in-memory store.

mod common;

use anyhow::Result;
use common::{
    GatedStore, PASSWORD, RecordingNotifier, config, harness, harness_on, harness_with,
    register_request,
};
use gatehouse::{
    auth::{
        AuthError, authenticator, bootstrap, invite,
        password::{PasswordPolicy, score},
        refresh, registration, reset,
        roles::Role,
        validation::{
            EmailRequest, InviteCompleteRequest, InviteRequest, LoginRequest,
            PasswordResetRequest, RegisterRequest, VerifyEmailQuery,
        },
        verification::{self, ResendOutcome},
    },
    notify::{Delivery, TEMPLATE_INVITE, TEMPLATE_PASSWORD_RESET, TEMPLATE_VERIFY_EMAIL},
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: Some(email.to_string()),
        password: Some(password.to_string()),
    }
}

async fn verified_user(h: &common::Harness, email: &str) -> Result<()> {
    registration::register(&h.state, &register_request(email)).await?;
    let token = h
        .notifier
        .last_token(email, TEMPLATE_VERIFY_EMAIL, "verify_url")?;
    verification::verify_email(&h.state, &VerifyEmailQuery { token: Some(token) }).await?;
    Ok(())
}

#[tokio::test]
async fn register_verify_login_and_rotate() -> Result<()> {
    let h = harness();
    let registered = registration::register(&h.state, &register_request("Ada@Example.com")).await?;
    assert_eq!(registered.user.email, "ada@example.com");
    assert!(!registered.user.email_verified);
    assert_eq!(registered.delivery, Delivery::Sent);

    let denied = authenticator::authenticate(&h.state, &login_request("ada@example.com", PASSWORD)).await;
    assert!(matches!(denied, Err(AuthError::EmailNotVerified)));

    let token = h
        .notifier
        .last_token("ada@example.com", TEMPLATE_VERIFY_EMAIL, "verify_url")?;
    let query = VerifyEmailQuery { token: Some(token) };
    let verified = verification::verify_email(&h.state, &query).await?;
    assert!(verified.email_verified);
    let replayed = verification::verify_email(&h.state, &query).await;
    assert!(matches!(replayed, Err(AuthError::InvalidOrExpiredToken)));

    let session = authenticator::authenticate(&h.state, &login_request("ADA@example.com", PASSWORD)).await?;
    assert!(session.user.last_login_at.is_some());
    let claims = h.state.access_tokens().validate(&session.access_token.token)?;
    assert_eq!(claims.user_id()?, session.user.id);

    let rotated = refresh::rotate(&h.state, &session.refresh_token).await?;
    assert_ne!(rotated.refresh_token, session.refresh_token);

    let replay = refresh::rotate(&h.state, &session.refresh_token).await;
    assert!(matches!(replay, Err(AuthError::InvalidOrExpiredToken)));

    refresh::rotate(&h.state, &rotated.refresh_token).await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() -> Result<()> {
    let h = harness();
    verified_user(&h, "grace@example.com").await?;

    let wrong = authenticator::authenticate(&h.state, &login_request("grace@example.com", "Not-The-Password-1")).await;
    let unknown = authenticator::authenticate(&h.state, &login_request("nobody@example.com", PASSWORD)).await;
    let (Err(wrong), Err(unknown)) = (wrong, unknown) else {
        anyhow::bail!("both logins should fail");
    };
    assert_eq!(wrong.code(), "INVALID_CREDENTIALS");
    assert_eq!(wrong.code(), unknown.code());
    assert_eq!(wrong.to_string(), unknown.to_string());
    Ok(())
}

#[tokio::test]
async fn concurrent_rotation_has_one_winner() -> Result<()> {
    let h = harness();
    verified_user(&h, "linus@example.com").await?;
    let session = authenticator::authenticate(&h.state, &login_request("linus@example.com", PASSWORD)).await?;

    let (first, second) = tokio::join!(
        refresh::rotate(&h.state, &session.refresh_token),
        refresh::rotate(&h.state, &session.refresh_token),
    );
    assert_eq!(
        usize::from(first.is_ok()) + usize::from(second.is_ok()),
        1,
        "exactly one rotation may succeed"
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected() -> Result<()> {
    let h = harness();
    registration::register(&h.state, &register_request("dup@example.com")).await?;
    let again = registration::register(&h.state, &register_request("DUP@example.com")).await;
    assert!(matches!(again, Err(AuthError::EmailAlreadyUsed)));
    assert_eq!(h.notifier.count(TEMPLATE_VERIFY_EMAIL), 1);
    Ok(())
}

#[tokio::test]
async fn registration_can_be_disabled() {
    let h = harness_with(
        config().with_registration_enabled(false),
        RecordingNotifier::default(),
        |state| state,
    );
    let result = registration::register(&h.state, &register_request("closed@example.com")).await;
    assert!(matches!(result, Err(AuthError::RegistrationDisabled)));
}

#[tokio::test]
async fn weak_password_is_rejected() {
    let h = harness_with(
        config().with_password_policy(PasswordPolicy {
            min_score: 4,
            ..PasswordPolicy::default()
        }),
        RecordingNotifier::default(),
        |state| state,
    );
    let request = RegisterRequest {
        email: Some("weak@example.com".to_string()),
        password: Some("password1".to_string()),
        password_confirmation: Some("password1".to_string()),
    };
    let result = registration::register(&h.state, &request).await;
    assert!(matches!(result, Err(AuthError::InvalidPassword)));
}

#[tokio::test]
async fn failed_notification_becomes_a_warning() -> Result<()> {
    let h = harness_with(config(), RecordingNotifier::failing(), |state| state);
    let registered = registration::register(&h.state, &register_request("warn@example.com")).await?;
    assert_eq!(registered.delivery, Delivery::Failed);
    let warnings = registered.delivery.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, "NOTIFICATION_FAILED");
    assert!(
        h.state
            .store()
            .find_user_by_email("warn@example.com")
            .await?
            .is_some()
    );
    Ok(())
}

#[tokio::test]
async fn resend_respects_cooldown_and_hides_accounts() -> Result<()> {
    let h = harness();
    registration::register(&h.state, &register_request("slow@example.com")).await?;
    let request = EmailRequest {
        email: Some("slow@example.com".to_string()),
    };
    assert_eq!(
        verification::resend_verification(&h.state, &request).await?,
        ResendOutcome::Cooldown
    );
    let unknown = EmailRequest {
        email: Some("ghost@example.com".to_string()),
    };
    assert_eq!(
        verification::resend_verification(&h.state, &unknown).await?,
        ResendOutcome::Noop
    );

    let eager = harness_with(
        config().with_resend_cooldown_seconds(0),
        RecordingNotifier::default(),
        |state| state,
    );
    registration::register(&eager.state, &register_request("slow@example.com")).await?;
    assert_eq!(
        verification::resend_verification(&eager.state, &request).await?,
        ResendOutcome::Queued
    );
    eager.notifier.wait_for_count(TEMPLATE_VERIFY_EMAIL, 2).await?;
    Ok(())
}

#[tokio::test]
async fn reset_request_is_indistinguishable() -> Result<()> {
    let h = harness();
    verified_user(&h, "reset@example.com").await?;

    reset::request_password_reset(
        &h.state,
        &EmailRequest {
            email: Some("reset@example.com".to_string()),
        },
    )
    .await?;
    reset::request_password_reset(
        &h.state,
        &EmailRequest {
            email: Some("missing@example.com".to_string()),
        },
    )
    .await?;

    // only the real account gets mail
    h.notifier.wait_for_count(TEMPLATE_PASSWORD_RESET, 1).await?;
    assert_eq!(h.notifier.count(TEMPLATE_PASSWORD_RESET), 1);
    Ok(())
}

#[tokio::test]
async fn reset_changes_password_and_revokes_sessions() -> Result<()> {
    let h = harness();
    verified_user(&h, "rotate@example.com").await?;
    let session = authenticator::authenticate(&h.state, &login_request("rotate@example.com", PASSWORD)).await?;

    reset::request_password_reset(
        &h.state,
        &EmailRequest {
            email: Some("rotate@example.com".to_string()),
        },
    )
    .await?;
    let token = h
        .notifier
        .wait_for_token("rotate@example.com", TEMPLATE_PASSWORD_RESET, "reset_url")
        .await?;

    let weak = PasswordResetRequest {
        token: Some(token.clone()),
        password: Some("short".to_string()),
        password_confirmation: Some("short".to_string()),
    };
    assert!(matches!(
        reset::confirm_password_reset(&h.state, &weak).await,
        Err(AuthError::InvalidPassword)
    ));

    let new_password = "Another-Strong-Pass-77";
    let request = PasswordResetRequest {
        token: Some(token),
        password: Some(new_password.to_string()),
        password_confirmation: Some(new_password.to_string()),
    };
    reset::confirm_password_reset(&h.state, &request).await?;

    assert!(matches!(
        reset::confirm_password_reset(&h.state, &request).await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
    assert!(matches!(
        refresh::rotate(&h.state, &session.refresh_token).await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
    assert!(matches!(
        authenticator::authenticate(&h.state, &login_request("rotate@example.com", PASSWORD)).await,
        Err(AuthError::InvalidCredentials)
    ));
    authenticator::authenticate(&h.state, &login_request("rotate@example.com", new_password)).await?;
    Ok(())
}

fn reset_request(token: &str, password: &str) -> PasswordResetRequest {
    PasswordResetRequest {
        token: Some(token.to_string()),
        password: Some(password.to_string()),
        password_confirmation: Some(password.to_string()),
    }
}

#[tokio::test]
async fn login_racing_a_reset_cannot_restore_the_old_password() -> Result<()> {
    let store = Arc::new(GatedStore::default());
    let h = harness_on(store.clone(), config(), RecordingNotifier::default(), |state| state);
    verified_user(&h, "race@example.com").await?;
    reset::request_password_reset(
        &h.state,
        &EmailRequest {
            email: Some("race@example.com".to_string()),
        },
    )
    .await?;
    let token = h
        .notifier
        .wait_for_token("race@example.com", TEMPLATE_PASSWORD_RESET, "reset_url")
        .await?;

    // The old password checks out, then the login stalls before its write.
    let state = h.state.clone();
    let login = tokio::spawn(async move {
        authenticator::authenticate(&state, &login_request("race@example.com", PASSWORD)).await
    });
    store.login_parked().await;

    let new_password = "Fresh-Start-Password-31";
    reset::confirm_password_reset(&h.state, &reset_request(&token, new_password)).await?;
    store.release();

    assert!(matches!(login.await?, Err(AuthError::InvalidCredentials)));
    assert!(matches!(
        authenticator::authenticate(&h.state, &login_request("race@example.com", PASSWORD)).await,
        Err(AuthError::InvalidCredentials)
    ));

    store.release();
    let session =
        authenticator::authenticate(&h.state, &login_request("race@example.com", new_password))
            .await?;
    assert!(session.user.last_login_at.is_some());
    Ok(())
}

#[tokio::test]
async fn account_lookups_do_not_wait_for_the_mail_gateway() -> Result<()> {
    let h = harness_with(
        config().with_resend_cooldown_seconds(0),
        RecordingNotifier::slow(Duration::from_millis(800)),
        |state| state,
    );
    registration::register(&h.state, &register_request("pending@example.com")).await?;
    let known = EmailRequest {
        email: Some("pending@example.com".to_string()),
    };

    let started = Instant::now();
    reset::request_password_reset(&h.state, &known).await?;
    assert!(started.elapsed() < Duration::from_millis(400));

    let started = Instant::now();
    assert_eq!(
        verification::resend_verification(&h.state, &known).await?,
        ResendOutcome::Queued
    );
    assert!(started.elapsed() < Duration::from_millis(400));

    h.notifier.wait_for_count(TEMPLATE_PASSWORD_RESET, 1).await?;
    h.notifier.wait_for_count(TEMPLATE_VERIFY_EMAIL, 2).await?;
    Ok(())
}

#[tokio::test]
async fn expired_refresh_token_is_rejected() -> Result<()> {
    let h = harness_with(
        config().with_refresh_token_ttl_seconds(-1),
        RecordingNotifier::default(),
        |state| state,
    );
    verified_user(&h, "stale@example.com").await?;
    let session =
        authenticator::authenticate(&h.state, &login_request("stale@example.com", PASSWORD)).await?;
    assert!(matches!(
        refresh::rotate(&h.state, &session.refresh_token).await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
    Ok(())
}

#[tokio::test]
async fn expired_verification_link_is_rejected() -> Result<()> {
    let h = harness_with(
        config().with_email_token_ttl_seconds(0),
        RecordingNotifier::default(),
        |state| state,
    );
    registration::register(&h.state, &register_request("late@example.com")).await?;
    let token = h
        .notifier
        .last_token("late@example.com", TEMPLATE_VERIFY_EMAIL, "verify_url")?;
    assert!(matches!(
        verification::verify_email(&h.state, &VerifyEmailQuery { token: Some(token) }).await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
    assert!(matches!(
        authenticator::authenticate(&h.state, &login_request("late@example.com", PASSWORD)).await,
        Err(AuthError::EmailNotVerified)
    ));
    Ok(())
}

#[tokio::test]
async fn expired_reset_link_leaves_password_unchanged() -> Result<()> {
    let h = harness_with(
        config().with_reset_token_ttl_seconds(-1),
        RecordingNotifier::default(),
        |state| state,
    );
    verified_user(&h, "forgot@example.com").await?;
    reset::request_password_reset(
        &h.state,
        &EmailRequest {
            email: Some("forgot@example.com".to_string()),
        },
    )
    .await?;
    let token = h
        .notifier
        .wait_for_token("forgot@example.com", TEMPLATE_PASSWORD_RESET, "reset_url")
        .await?;

    assert!(matches!(
        reset::confirm_password_reset(&h.state, &reset_request(&token, "Never-Applied-Pass-55"))
            .await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
    authenticator::authenticate(&h.state, &login_request("forgot@example.com", PASSWORD)).await?;
    Ok(())
}

#[tokio::test]
async fn verification_link_cannot_reset_a_password() -> Result<()> {
    let h = harness();
    registration::register(&h.state, &register_request("mixup@example.com")).await?;
    let token = h
        .notifier
        .last_token("mixup@example.com", TEMPLATE_VERIFY_EMAIL, "verify_url")?;

    assert!(matches!(
        reset::confirm_password_reset(&h.state, &reset_request(&token, "Hijacked-Password-88"))
            .await,
        Err(AuthError::InvalidOrExpiredToken)
    ));

    // still usable for its own purpose
    let user = verification::verify_email(&h.state, &VerifyEmailQuery { token: Some(token) }).await?;
    assert!(user.email_verified);
    authenticator::authenticate(&h.state, &login_request("mixup@example.com", PASSWORD)).await?;
    Ok(())
}

#[tokio::test]
async fn logout_everywhere_revokes_all_sessions() -> Result<()> {
    let h = harness();
    verified_user(&h, "multi@example.com").await?;
    let first = authenticator::authenticate(&h.state, &login_request("multi@example.com", PASSWORD)).await?;
    let second = authenticator::authenticate(&h.state, &login_request("multi@example.com", PASSWORD)).await?;

    refresh::logout(&h.state, "not-a-real-token", false).await?;
    refresh::logout(&h.state, &first.refresh_token, true).await?;

    assert!(refresh::rotate(&h.state, &first.refresh_token).await.is_err());
    assert!(refresh::rotate(&h.state, &second.refresh_token).await.is_err());
    Ok(())
}

#[tokio::test]
async fn bootstrap_runs_once() -> Result<()> {
    let h = harness_with(
        config().with_registration_enabled(false),
        RecordingNotifier::default(),
        |state| state,
    );
    assert!(bootstrap::needs_bootstrap(&h.state).await?);

    let root_request = register_request("root@example.com");
    let other_request = register_request("other@example.com");
    let (first, second) = tokio::join!(
        bootstrap::create_initial_admin(&h.state, &root_request),
        bootstrap::create_initial_admin(&h.state, &other_request),
    );
    let admins: Vec<_> = [first, second].into_iter().filter_map(Result::ok).collect();
    assert_eq!(admins.len(), 1);
    assert!(admins[0].roles.is_admin());
    assert!(admins[0].email_verified);

    assert!(!bootstrap::needs_bootstrap(&h.state).await?);
    let late = bootstrap::create_initial_admin(&h.state, &register_request("late@example.com")).await;
    assert!(matches!(late, Err(AuthError::InitialAdminAlreadyCreated)));
    Ok(())
}

#[tokio::test]
async fn invite_completes_once() -> Result<()> {
    let h = harness();
    bootstrap::create_initial_admin(&h.state, &register_request("admin@example.com")).await?;
    let session = authenticator::authenticate(&h.state, &login_request("admin@example.com", PASSWORD)).await?;
    let claims = h.state.access_tokens().validate(&session.access_token.token)?;

    let invited = invite::create_invite(
        &h.state,
        &claims,
        &InviteRequest {
            email: Some("New.Hire@example.com".to_string()),
            roles: vec!["ROLE_ADMIN".to_string()],
        },
    )
    .await?;
    assert_eq!(invited.invite.email, "new.hire@example.com");
    assert!(invited.invite.roles.contains(Role::User));
    assert!(invited.invite.roles.contains(Role::Admin));

    let token = h
        .notifier
        .last_token("new.hire@example.com", TEMPLATE_INVITE, "invite_url")?;
    let request = InviteCompleteRequest {
        token: Some(token),
        password: Some(PASSWORD.to_string()),
        password_confirmation: Some(PASSWORD.to_string()),
    };
    let user = invite::complete_invite(&h.state, &request).await?;
    assert!(user.email_verified);
    assert!(user.roles.is_admin());

    let again = invite::complete_invite(&h.state, &request).await;
    assert!(matches!(again, Err(AuthError::InviteAlreadyAccepted)));

    let unknown = InviteCompleteRequest {
        token: Some("no-such-invite".to_string()),
        ..request
    };
    assert!(matches!(
        invite::complete_invite(&h.state, &unknown).await,
        Err(AuthError::InviteNotFound)
    ));

    authenticator::authenticate(&h.state, &login_request("new.hire@example.com", PASSWORD)).await?;
    Ok(())
}

#[tokio::test]
async fn expired_invite_is_rejected() -> Result<()> {
    let h = harness_with(
        config().with_invite_ttl_seconds(-1),
        RecordingNotifier::default(),
        |state| state,
    );
    bootstrap::create_initial_admin(&h.state, &register_request("admin@example.com")).await?;
    let session =
        authenticator::authenticate(&h.state, &login_request("admin@example.com", PASSWORD)).await?;
    let claims = h.state.access_tokens().validate(&session.access_token.token)?;
    invite::create_invite(
        &h.state,
        &claims,
        &InviteRequest {
            email: Some("tardy@example.com".to_string()),
            roles: Vec::new(),
        },
    )
    .await?;
    let token = h
        .notifier
        .last_token("tardy@example.com", TEMPLATE_INVITE, "invite_url")?;

    let result = invite::complete_invite(
        &h.state,
        &InviteCompleteRequest {
            token: Some(token),
            password: Some(PASSWORD.to_string()),
            password_confirmation: Some(PASSWORD.to_string()),
        },
    )
    .await;
    assert!(matches!(result, Err(AuthError::InviteExpired)));
    assert!(h.state.store().find_user_by_email("tardy@example.com").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn only_admins_invite() -> Result<()> {
    let h = harness();
    verified_user(&h, "member@example.com").await?;
    let session = authenticator::authenticate(&h.state, &login_request("member@example.com", PASSWORD)).await?;
    let claims = h.state.access_tokens().validate(&session.access_token.token)?;

    let result = invite::create_invite(
        &h.state,
        &claims,
        &InviteRequest {
            email: Some("friend@example.com".to_string()),
            roles: Vec::new(),
        },
    )
    .await;
    assert!(matches!(result, Err(AuthError::Forbidden)));
    assert_eq!(h.notifier.count(TEMPLATE_INVITE), 0);
    Ok(())
}

#[test]
fn appending_characters_never_lowers_the_score() {
    let seeds = ["", "a", "abc12", "Password", "correct horse", "Tr0ub4dor&3"];
    let suffixes = ['a', 'Z', '7', '!', ' '];
    for seed in seeds {
        let mut candidate = seed.to_string();
        for round in 0..20 {
            let before = score(&candidate);
            candidate.push(suffixes[round % suffixes.len()]);
            assert!(score(&candidate) >= before, "score dropped for {candidate:?}");
        }
    }
}
