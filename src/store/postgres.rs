//! Postgres-backed store.
//!
//! Atomic operations map onto single conditional statements or short
//! transactions:
//! - refresh rotation deletes the presented row with `RETURNING` and inserts
//!   the replacement in the same transaction. A concurrent rotation of the
//!   same token blocks on the row lock and then finds nothing to delete.
//! - initial admin creation takes a transaction-scoped advisory lock before
//!   counting users.
//! - one-time tokens and invites are consumed with guarded `UPDATE`s.
//! - a login stamps the user only if the hash it verified is still current,
//!   and inserts its refresh token in the same transaction. Password changes
//!   revoke refresh tokens in their own transaction, so the two serialize on
//!   the user row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::time::Duration;
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{
    AcceptInviteOutcome, ActionToken, BootstrapOutcome, InsertOutcome, InviteUser, PurgeReport,
    RefreshToken, Store, TokenPurpose, User,
};
use crate::auth::roles::Roles;

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const BOOTSTRAP_LOCK_ID: i64 = 0x6761_7465_686f_7573;

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> User {
    let roles: Vec<String> = row.get("roles");
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        roles: Roles::from_strings(roles),
        email_verified: row.get("email_verified"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn invite_from_row(row: &PgRow) -> InviteUser {
    let roles: Vec<String> = row.get("roles");
    InviteUser {
        id: row.get("id"),
        email: row.get("email"),
        token_hash: row.get("token_hash"),
        roles: Roles::from_strings(roles),
        invited_by: row.get("invited_by"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        accepted_at: row.get("accepted_at"),
    }
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and verify the database is reachable.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be established.
    pub async fn connect(dsn: &SecretString) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(dsn.expose_secret())
            .await
            .context("failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }

    async fn insert_user_in<'e, E>(executor: E, user: &User) -> Result<InsertOutcome>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let query = r"
            INSERT INTO users
                (id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.roles.to_strings())
            .bind(user.email_verified)
            .bind(user.last_login_at)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(executor)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn revoke_in(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&mut **tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }

    async fn count_users(&self) -> Result<u64> {
        let query = "SELECT COUNT(*) AS count FROM users";
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count users")?;
        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = "SELECT id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = "SELECT id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn insert_user(&self, user: &User) -> Result<InsertOutcome> {
        Self::insert_user_in(&self.pool, user).await
    }

    async fn insert_initial_admin(&self, user: &User) -> Result<BootstrapOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin bootstrap transaction")?;

        let lock_query = "SELECT pg_advisory_xact_lock($1)";
        sqlx::query(lock_query)
            .bind(BOOTSTRAP_LOCK_ID)
            .execute(&mut *tx)
            .instrument(db_span("SELECT", lock_query))
            .await
            .context("failed to acquire bootstrap lock")?;

        let count_query = "SELECT COUNT(*) AS count FROM users";
        let row = sqlx::query(count_query)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", count_query))
            .await
            .context("failed to count users")?;
        let count: i64 = row.get("count");
        if count != 0 {
            tx.rollback()
                .await
                .context("failed to rollback bootstrap transaction")?;
            return Ok(BootstrapOutcome::Closed);
        }

        if Self::insert_user_in(&mut *tx, user).await? == InsertOutcome::Conflict {
            tx.rollback()
                .await
                .context("failed to rollback bootstrap transaction")?;
            return Ok(BootstrapOutcome::Closed);
        }

        tx.commit()
            .await
            .context("failed to commit bootstrap transaction")?;
        Ok(BootstrapOutcome::Inserted)
    }

    async fn record_login(
        &self,
        user_id: Uuid,
        verified_hash: &str,
        refresh: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin login transaction")?;

        // Blocks behind a concurrent password change and re-checks the hash.
        let update_query = r"
            UPDATE users
            SET last_login_at = $3, updated_at = $3
            WHERE id = $1 AND password_hash = $2
            RETURNING id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at
        ";
        let row = sqlx::query(update_query)
            .bind(user_id)
            .bind(verified_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", update_query))
            .await
            .context("failed to record login")?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .context("failed to rollback login transaction")?;
            return Ok(None);
        };

        let insert_query = r"
            INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(insert_query)
            .bind(&refresh.token_hash)
            .bind(refresh.user_id)
            .bind(refresh.expires_at)
            .bind(refresh.created_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", insert_query))
            .await
            .context("failed to insert refresh token")?;

        tx.commit()
            .await
            .context("failed to commit login transaction")?;
        Ok(Some(user_from_row(&row)))
    }

    async fn mark_verified(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>> {
        let query = r"
            UPDATE users
            SET email_verified = TRUE,
                updated_at = CASE WHEN email_verified THEN updated_at ELSE $2 END
            WHERE id = $1
            RETURNING id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to mark email verified")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn replace_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin password transaction")?;

        let update_query = r"
            UPDATE users
            SET password_hash = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at
        ";
        let row = sqlx::query(update_query)
            .bind(user_id)
            .bind(password_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", update_query))
            .await
            .context("failed to replace password hash")?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .context("failed to rollback password transaction")?;
            return Ok(None);
        };

        Self::revoke_in(&mut tx, user_id).await?;
        tx.commit()
            .await
            .context("failed to commit password transaction")?;
        Ok(Some(user_from_row(&row)))
    }

    async fn activate_invited(
        &self,
        user_id: Uuid,
        password_hash: &str,
        roles: &Roles,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin activation transaction")?;

        let lock_query = "SELECT roles FROM users WHERE id = $1 FOR UPDATE";
        let row = sqlx::query(lock_query)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", lock_query))
            .await
            .context("failed to lock invited user")?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .context("failed to rollback activation transaction")?;
            return Ok(None);
        };
        let current = Roles::from_strings(row.get::<Vec<String>, _>("roles"));
        let merged = Roles::new(current.iter().chain(roles.iter()));

        let update_query = r"
            UPDATE users
            SET password_hash = $2, roles = $3, email_verified = TRUE, updated_at = $4
            WHERE id = $1
            RETURNING id, email, password_hash, roles, email_verified, last_login_at, created_at, updated_at
        ";
        let row = sqlx::query(update_query)
            .bind(user_id)
            .bind(password_hash)
            .bind(merged.to_strings())
            .bind(now)
            .fetch_one(&mut *tx)
            .instrument(db_span("UPDATE", update_query))
            .await
            .context("failed to activate invited user")?;

        Self::revoke_in(&mut tx, user_id).await?;
        tx.commit()
            .await
            .context("failed to commit activation transaction")?;
        Ok(Some(user_from_row(&row)))
    }

    async fn insert_action_token(&self, token: &ActionToken) -> Result<()> {
        let query = r"
            INSERT INTO action_tokens (token_hash, user_id, purpose, expires_at, created_at, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(&token.token_hash)
            .bind(token.user_id)
            .bind(token.purpose.as_str())
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.consumed_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert action token")?;
        Ok(())
    }

    async fn consume_action_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let query = r"
            UPDATE action_tokens
            SET consumed_at = $3
            WHERE token_hash = $1
              AND purpose = $2
              AND consumed_at IS NULL
              AND expires_at > $3
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(purpose.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to consume action token")?;
        Ok(row.map(|row| row.get("user_id")))
    }

    async fn latest_action_token_at(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<Option<DateTime<Utc>>> {
        let query = r"
            SELECT MAX(created_at) AS latest
            FROM action_tokens
            WHERE user_id = $1 AND purpose = $2
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(purpose.as_str())
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup latest action token")?;
        Ok(row.get("latest"))
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&token.token_hash)
            .bind(token.user_id)
            .bind(token.expires_at)
            .bind(token.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        replacement_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin rotation transaction")?;

        let delete_query = r"
            DELETE FROM refresh_tokens
            WHERE token_hash = $1 AND expires_at >= $2
            RETURNING user_id
        ";
        let row = sqlx::query(delete_query)
            .bind(presented_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("DELETE", delete_query))
            .await
            .context("failed to delete presented refresh token")?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .context("failed to rollback rotation transaction")?;
            return Ok(None);
        };

        let replacement = RefreshToken {
            token_hash: replacement_hash.to_vec(),
            user_id: row.get("user_id"),
            expires_at: replacement_expires_at,
            created_at: now,
        };

        let insert_query = r"
            INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(insert_query)
            .bind(&replacement.token_hash)
            .bind(replacement.user_id)
            .bind(replacement.expires_at)
            .bind(replacement.created_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", insert_query))
            .await
            .context("failed to insert rotated refresh token")?;

        tx.commit()
            .await
            .context("failed to commit rotation transaction")?;
        Ok(Some(replacement))
    }

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<Option<Uuid>> {
        let query = "DELETE FROM refresh_tokens WHERE token_hash = $1 RETURNING user_id";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete refresh token")?;
        Ok(row.map(|row| row.get("user_id")))
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn insert_invite(&self, invite: &InviteUser) -> Result<()> {
        let query = r"
            INSERT INTO invites
                (id, email, token_hash, roles, invited_by, created_at, expires_at, accepted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(invite.id)
            .bind(&invite.email)
            .bind(&invite.token_hash)
            .bind(invite.roles.to_strings())
            .bind(invite.invited_by)
            .bind(invite.created_at)
            .bind(invite.expires_at)
            .bind(invite.accepted_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert invite")?;
        Ok(())
    }

    async fn accept_invite(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<AcceptInviteOutcome> {
        let update_query = r"
            UPDATE invites
            SET accepted_at = $2
            WHERE token_hash = $1 AND accepted_at IS NULL AND expires_at > $2
            RETURNING id, email, token_hash, roles, invited_by, created_at, expires_at, accepted_at
        ";
        let row = sqlx::query(update_query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", update_query))
            .await
            .context("failed to accept invite")?;
        if let Some(row) = row {
            return Ok(AcceptInviteOutcome::Accepted(invite_from_row(&row)));
        }

        let lookup_query = "SELECT accepted_at FROM invites WHERE token_hash = $1";
        let row = sqlx::query(lookup_query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", lookup_query))
            .await
            .context("failed to lookup invite")?;
        Ok(match row {
            None => AcceptInviteOutcome::NotFound,
            Some(row) => {
                let accepted_at: Option<DateTime<Utc>> = row.get("accepted_at");
                if accepted_at.is_some() {
                    AcceptInviteOutcome::AlreadyAccepted
                } else {
                    AcceptInviteOutcome::Expired
                }
            }
        })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let refresh_query = "DELETE FROM refresh_tokens WHERE expires_at < $1";
        let refresh = sqlx::query(refresh_query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", refresh_query))
            .await
            .context("failed to purge refresh tokens")?;

        let action_query =
            "DELETE FROM action_tokens WHERE consumed_at IS NOT NULL OR expires_at <= $1";
        let action = sqlx::query(action_query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", action_query))
            .await
            .context("failed to purge action tokens")?;

        Ok(PurgeReport {
            refresh_tokens: refresh.rows_affected(),
            action_tokens: action.rows_affected(),
        })
    }
}
