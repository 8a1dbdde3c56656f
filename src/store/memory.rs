//! In-process store used by tests and when no database is configured.
//!
//! A single async mutex guards all tables, so every trait method is atomic
//! with respect to every other one.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AcceptInviteOutcome, ActionToken, BootstrapOutcome, InsertOutcome, InviteUser, PurgeReport,
    RefreshToken, Store, TokenPurpose, User,
};
use crate::auth::roles::Roles;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    emails: HashMap<String, Uuid>,
    action_tokens: HashMap<Vec<u8>, ActionToken>,
    refresh_tokens: HashMap<Vec<u8>, RefreshToken>,
    invites: HashMap<Vec<u8>, InviteUser>,
}

impl Tables {
    fn insert_user(&mut self, user: &User) -> InsertOutcome {
        if self.emails.contains_key(&user.email) {
            return InsertOutcome::Conflict;
        }
        self.emails.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user.clone());
        InsertOutcome::Inserted
    }

    fn revoke(&mut self, user_id: Uuid) -> u64 {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|_, token| token.user_id != user_id);
        (before - self.refresh_tokens.len()) as u64
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn count_users(&self) -> Result<u64> {
        let tables = self.tables.lock().await;
        Ok(tables.users.len() as u64)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .emails
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        Ok(tables.insert_user(user))
    }

    async fn insert_initial_admin(&self, user: &User) -> Result<BootstrapOutcome> {
        let mut tables = self.tables.lock().await;
        if !tables.users.is_empty() {
            return Ok(BootstrapOutcome::Closed);
        }
        match tables.insert_user(user) {
            InsertOutcome::Inserted => Ok(BootstrapOutcome::Inserted),
            InsertOutcome::Conflict => Ok(BootstrapOutcome::Closed),
        }
    }

    async fn record_login(
        &self,
        user_id: Uuid,
        verified_hash: &str,
        refresh: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(None);
        };
        if user.password_hash != verified_hash {
            return Ok(None);
        }
        user.record_login(now);
        let user = user.clone();
        tables
            .refresh_tokens
            .insert(refresh.token_hash.clone(), refresh.clone());
        Ok(Some(user))
    }

    async fn mark_verified(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.users.get_mut(&user_id).map(|user| {
            if !user.email_verified {
                user.mark_verified(now);
            }
            user.clone()
        }))
    }

    async fn replace_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.set_password_hash(password_hash.to_string(), now);
        let user = user.clone();
        tables.revoke(user_id);
        Ok(Some(user))
    }

    async fn activate_invited(
        &self,
        user_id: Uuid,
        password_hash: &str,
        roles: &Roles,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.set_password_hash(password_hash.to_string(), now);
        user.set_roles(Roles::new(user.roles.iter().chain(roles.iter())), now);
        user.mark_verified(now);
        let user = user.clone();
        tables.revoke(user_id);
        Ok(Some(user))
    }

    async fn insert_action_token(&self, token: &ActionToken) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .action_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn consume_action_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tables = self.tables.lock().await;
        let Some(token) = tables.action_tokens.get_mut(token_hash) else {
            return Ok(None);
        };
        if token.purpose != purpose || token.consumed_at.is_some() || token.expires_at <= now {
            return Ok(None);
        }
        token.consumed_at = Some(now);
        Ok(Some(token.user_id))
    }

    async fn latest_action_token_at(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .action_tokens
            .values()
            .filter(|token| token.user_id == user_id && token.purpose == purpose)
            .map(|token| token.created_at)
            .max())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .refresh_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        replacement_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let mut tables = self.tables.lock().await;
        let valid = tables
            .refresh_tokens
            .get(presented_hash)
            .is_some_and(|token| token.is_valid_at(now));
        if !valid {
            return Ok(None);
        }
        let Some(presented) = tables.refresh_tokens.remove(presented_hash) else {
            return Ok(None);
        };
        let replacement = RefreshToken {
            token_hash: replacement_hash.to_vec(),
            user_id: presented.user_id,
            expires_at: replacement_expires_at,
            created_at: now,
        };
        tables
            .refresh_tokens
            .insert(replacement.token_hash.clone(), replacement.clone());
        Ok(Some(replacement))
    }

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<Option<Uuid>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .refresh_tokens
            .remove(token_hash)
            .map(|token| token.user_id))
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.revoke(user_id))
    }

    async fn insert_invite(&self, invite: &InviteUser) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .invites
            .insert(invite.token_hash.clone(), invite.clone());
        Ok(())
    }

    async fn accept_invite(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<AcceptInviteOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(invite) = tables.invites.get_mut(token_hash) else {
            return Ok(AcceptInviteOutcome::NotFound);
        };
        if invite.accepted_at.is_some() {
            return Ok(AcceptInviteOutcome::AlreadyAccepted);
        }
        if invite.expires_at <= now {
            return Ok(AcceptInviteOutcome::Expired);
        }
        invite.accepted_at = Some(now);
        Ok(AcceptInviteOutcome::Accepted(invite.clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let mut tables = self.tables.lock().await;
        let refresh_before = tables.refresh_tokens.len();
        tables
            .refresh_tokens
            .retain(|_, token| token.is_valid_at(now));
        let action_before = tables.action_tokens.len();
        tables
            .action_tokens
            .retain(|_, token| token.consumed_at.is_none() && token.expires_at > now);
        Ok(PurgeReport {
            refresh_tokens: (refresh_before - tables.refresh_tokens.len()) as u64,
            action_tokens: (action_before - tables.action_tokens.len()) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::Roles;
    use chrono::Duration;
    use std::sync::Arc;

    fn user(email: &str) -> User {
        User::create(
            email.to_string(),
            "hash".to_string(),
            Roles::user(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(
            store.insert_user(&user("a@example.com")).await?,
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_user(&user("a@example.com")).await?,
            InsertOutcome::Conflict
        );
        assert_eq!(store.count_users().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn initial_admin_only_once() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(
            store.insert_initial_admin(&user("a@example.com")).await?,
            BootstrapOutcome::Inserted
        );
        assert_eq!(
            store.insert_initial_admin(&user("b@example.com")).await?,
            BootstrapOutcome::Closed
        );
        assert_eq!(store.count_users().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn action_tokens_are_single_use_and_purpose_scoped() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();
        store
            .insert_action_token(&ActionToken {
                token_hash: vec![7; 32],
                user_id: owner,
                purpose: TokenPurpose::EmailVerification,
                expires_at: now + Duration::minutes(5),
                created_at: now,
                consumed_at: None,
            })
            .await?;

        assert_eq!(
            store
                .consume_action_token(&[7; 32], TokenPurpose::PasswordReset, now)
                .await?,
            None
        );
        assert_eq!(
            store
                .consume_action_token(&[7; 32], TokenPurpose::EmailVerification, now)
                .await?,
            Some(owner)
        );
        assert_eq!(
            store
                .consume_action_token(&[7; 32], TokenPurpose::EmailVerification, now)
                .await?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_action_token_is_rejected() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_action_token(&ActionToken {
                token_hash: vec![3; 32],
                user_id: Uuid::new_v4(),
                purpose: TokenPurpose::PasswordReset,
                expires_at: now - Duration::seconds(1),
                created_at: now - Duration::minutes(10),
                consumed_at: None,
            })
            .await?;
        assert_eq!(
            store
                .consume_action_token(&[3; 32], TokenPurpose::PasswordReset, now)
                .await?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_rotation_has_one_winner() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .insert_refresh_token(&RefreshToken {
                token_hash: vec![1; 32],
                user_id: Uuid::new_v4(),
                expires_at: now + Duration::days(1),
                created_at: now,
            })
            .await?;

        let expires = now + Duration::days(2);
        let (a, b) = tokio::join!(
            store.rotate_refresh_token(&[1; 32], &[2; 32], expires, now),
            store.rotate_refresh_token(&[1; 32], &[3; 32], expires, now),
        );
        let winners = [a?, b?].into_iter().flatten().count();
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_expired_and_consumed() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();
        for (hash, expires_at) in [
            (vec![1], now - Duration::seconds(1)),
            (vec![2], now + Duration::hours(1)),
        ] {
            store
                .insert_refresh_token(&RefreshToken {
                    token_hash: hash,
                    user_id: owner,
                    expires_at,
                    created_at: now,
                })
                .await?;
        }
        store
            .insert_action_token(&ActionToken {
                token_hash: vec![9],
                user_id: owner,
                purpose: TokenPurpose::EmailVerification,
                expires_at: now + Duration::hours(1),
                created_at: now,
                consumed_at: Some(now),
            })
            .await?;

        let report = store.purge_expired(now).await?;
        assert_eq!(
            report,
            PurgeReport {
                refresh_tokens: 1,
                action_tokens: 1
            }
        );
        Ok(())
    }

    fn refresh_for(user_id: Uuid, hash: u8, now: DateTime<Utc>) -> RefreshToken {
        RefreshToken {
            token_hash: vec![hash; 32],
            user_id,
            expires_at: now + Duration::days(1),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn login_after_password_change_is_refused() -> Result<()> {
        let store = MemoryStore::new();
        let owner = user("login@example.com");
        store.insert_user(&owner).await?;
        let now = Utc::now();

        let stale = owner.password_hash.clone();
        store.replace_password(owner.id, "new-hash", now).await?;
        assert!(
            store
                .record_login(owner.id, &stale, &refresh_for(owner.id, 4, now), now)
                .await?
                .is_none()
        );
        assert!(store.delete_refresh_token(&[4; 32]).await?.is_none());

        let user = store
            .record_login(owner.id, "new-hash", &refresh_for(owner.id, 5, now), now)
            .await?;
        assert_eq!(user.and_then(|u| u.last_login_at), Some(now));
        assert_eq!(store.delete_refresh_token(&[5; 32]).await?, Some(owner.id));
        Ok(())
    }

    #[tokio::test]
    async fn replace_password_revokes_sessions_only_for_owner() -> Result<()> {
        let store = MemoryStore::new();
        let owner = user("owner@example.com");
        let other = user("other@example.com");
        store.insert_user(&owner).await?;
        store.insert_user(&other).await?;
        let now = Utc::now();
        store.insert_refresh_token(&refresh_for(owner.id, 1, now)).await?;
        store.insert_refresh_token(&refresh_for(other.id, 2, now)).await?;

        let updated = store.replace_password(owner.id, "rotated", now).await?;
        assert_eq!(updated.map(|u| u.password_hash), Some("rotated".to_string()));
        assert!(store.delete_refresh_token(&[1; 32]).await?.is_none());
        assert_eq!(store.delete_refresh_token(&[2; 32]).await?, Some(other.id));
        assert!(
            store
                .replace_password(Uuid::new_v4(), "nobody", now)
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn activation_merges_roles_and_verifies() -> Result<()> {
        let store = MemoryStore::new();
        let owner = user("invited@example.com");
        store.insert_user(&owner).await?;
        let now = Utc::now();
        let user = store
            .activate_invited(owner.id, "invited-hash", &Roles::admin(), now)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user missing"))?;
        assert!(user.email_verified);
        assert!(user.roles.is_admin());
        assert!(user.roles.contains(crate::auth::roles::Role::User));
        assert_eq!(user.password_hash, "invited-hash");
        Ok(())
    }
}
