//! Shared fixtures: an in-memory state wired to a notifier that records
//! every message so tests can pull one-time links out of them.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse::{
    auth::{
        AuthConfig, AuthState, roles::Roles, token::AccessTokenIssuer,
        validation::RegisterRequest,
    },
    notify::{Dispatcher, Notification, Notifier},
    store::{
        AcceptInviteOutcome, ActionToken, BootstrapOutcome, InsertOutcome, InviteUser,
        MemoryStore, PurgeReport, RefreshToken, Store, TokenPurpose, User,
    },
};
use secrecy::SecretString;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const FRONTEND: &str = "https://app.example.test";
pub const PASSWORD: &str = "Correct-Horse-9-Battery";
pub const ACCESS_SECRET: &str = "integration-access-secret";

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Records each message only after `delay`, like a sluggish gateway.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, template: &str) -> usize {
        self.sent()
            .iter()
            .filter(|notification| notification.template == template)
            .count()
    }

    /// Raw token from the most recent `template` message for `recipient`.
    pub fn last_token(&self, recipient: &str, template: &str, key: &str) -> Result<String> {
        let sent = self.sent();
        let notification = sent
            .iter()
            .rev()
            .find(|n| n.recipient == recipient && n.template == template)
            .with_context(|| format!("no {template} message for {recipient}"))?;
        let link = notification
            .data
            .get(key)
            .with_context(|| format!("{template} message has no {key}"))?;
        let (_, token) = link
            .split_once("#token=")
            .with_context(|| format!("link without token: {link}"))?;
        Ok(token.to_string())
    }

    /// Poll until `count(template)` reaches `expected`. Background sends land
    /// after the flow has returned.
    pub async fn wait_for_count(&self, template: &str, expected: usize) -> Result<()> {
        for _ in 0..200 {
            if self.count(template) >= expected {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!(
            "expected {expected} {template} messages, saw {}",
            self.count(template)
        )
    }

    /// Like [`Self::last_token`], waiting for a background send first.
    pub async fn wait_for_token(&self, recipient: &str, template: &str, key: &str) -> Result<String> {
        for _ in 0..200 {
            if let Ok(token) = self.last_token(recipient, template, key) {
                return Ok(token);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.last_token(recipient, template, key)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        if self.fail {
            anyhow::bail!("mail gateway unavailable");
        }
        Ok(())
    }
}

pub struct Harness {
    pub state: Arc<AuthState>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn config() -> AuthConfig {
    AuthConfig::new(FRONTEND.to_string())
}

pub fn issuer() -> AccessTokenIssuer {
    AccessTokenIssuer::new(
        SecretString::from(ACCESS_SECRET),
        "gatehouse".to_string(),
        900,
    )
}

pub fn harness_with(
    config: AuthConfig,
    notifier: RecordingNotifier,
    customize: impl FnOnce(AuthState) -> AuthState,
) -> Harness {
    harness_on(Arc::new(MemoryStore::new()), config, notifier, customize)
}

pub fn harness_on(
    store: Arc<dyn Store>,
    config: AuthConfig,
    notifier: RecordingNotifier,
    customize: impl FnOnce(AuthState) -> AuthState,
) -> Harness {
    let notifier = Arc::new(notifier);
    let dispatcher = Dispatcher::new(notifier.clone(), Duration::from_secs(1));
    let state = AuthState::new(config, store, issuer()).with_dispatcher(dispatcher);
    Harness {
        state: Arc::new(customize(state)),
        notifier,
    }
}

pub fn harness() -> Harness {
    harness_with(config(), RecordingNotifier::default(), |state| state)
}

pub fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: Some(email.to_string()),
        password: Some(PASSWORD.to_string()),
        password_confirmation: Some(PASSWORD.to_string()),
    }
}

/// Memory store that parks every `record_login` until [`Self::release`], so a
/// test can change the password between a login's check and its write.
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryStore,
    parked: Notify,
    release: Notify,
}

impl GatedStore {
    /// Resolves once a login is waiting at the gate.
    pub async fn login_parked(&self) {
        self.parked.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn count_users(&self) -> Result<u64> {
        self.inner.count_users().await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.inner.find_user_by_id(id).await
    }

    async fn insert_user(&self, user: &User) -> Result<InsertOutcome> {
        self.inner.insert_user(user).await
    }

    async fn insert_initial_admin(&self, user: &User) -> Result<BootstrapOutcome> {
        self.inner.insert_initial_admin(user).await
    }

    async fn record_login(
        &self,
        user_id: Uuid,
        verified_hash: &str,
        refresh: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        self.parked.notify_one();
        self.release.notified().await;
        self.inner
            .record_login(user_id, verified_hash, refresh, now)
            .await
    }

    async fn mark_verified(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>> {
        self.inner.mark_verified(user_id, now).await
    }

    async fn replace_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        self.inner.replace_password(user_id, password_hash, now).await
    }

    async fn activate_invited(
        &self,
        user_id: Uuid,
        password_hash: &str,
        roles: &Roles,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        self.inner
            .activate_invited(user_id, password_hash, roles, now)
            .await
    }

    async fn insert_action_token(&self, token: &ActionToken) -> Result<()> {
        self.inner.insert_action_token(token).await
    }

    async fn consume_action_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        self.inner.consume_action_token(token_hash, purpose, now).await
    }

    async fn latest_action_token_at(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<Option<DateTime<Utc>>> {
        self.inner.latest_action_token_at(user_id, purpose).await
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.inner.insert_refresh_token(token).await
    }

    async fn rotate_refresh_token(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        replacement_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        self.inner
            .rotate_refresh_token(presented_hash, replacement_hash, replacement_expires_at, now)
            .await
    }

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<Option<Uuid>> {
        self.inner.delete_refresh_token(token_hash).await
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64> {
        self.inner.revoke_refresh_tokens(user_id).await
    }

    async fn insert_invite(&self, invite: &InviteUser) -> Result<()> {
        self.inner.insert_invite(invite).await
    }

    async fn accept_invite(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<AcceptInviteOutcome> {
        self.inner.accept_invite(token_hash, now).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        self.inner.purge_expired(now).await
    }
}
