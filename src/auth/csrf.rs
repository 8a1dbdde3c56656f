//! Per-action CSRF tokens.
//!
//! Tokens are stateless: `<issued_at>.<mac>` where the MAC is HMAC-SHA256 over
//! the action name, the session nonce held in the `gatehouse_csrf` cookie and
//! the issue time. A token minted for `register` does not validate
//! `password_reset`, and a token lifted from another browser does not match
//! its session nonce. Tokens are reusable until they expire.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE: &str = "gatehouse_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

pub const ACTION_AUTHENTICATE: &str = "authenticate";
pub const ACTION_REGISTER: &str = "register";
pub const ACTION_PASSWORD_REQUEST: &str = "password_request";
pub const ACTION_PASSWORD_RESET: &str = "password_reset";
pub const ACTION_INVITE: &str = "invite";
pub const ACTION_INVITE_COMPLETE: &str = "invite_complete";
pub const ACTION_REFRESH: &str = "refresh";
pub const ACTION_LOGOUT: &str = "logout";
pub const ACTION_RESEND_VERIFICATION: &str = "resend_verification";
pub const ACTION_BOOTSTRAP: &str = "bootstrap";

/// Actions protected unless configured otherwise.
pub const DEFAULT_ACTIONS: &[&str] = &[
    ACTION_AUTHENTICATE,
    ACTION_REGISTER,
    ACTION_PASSWORD_REQUEST,
    ACTION_PASSWORD_RESET,
    ACTION_INVITE_COMPLETE,
    ACTION_REFRESH,
    ACTION_LOGOUT,
];

const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Clone)]
pub struct CsrfGuard {
    secret: SecretString,
    ttl_seconds: i64,
    actions: BTreeSet<String>,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl CsrfGuard {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            actions: DEFAULT_ACTIONS.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.actions = actions
            .into_iter()
            .map(|action| action.as_ref().trim().to_lowercase())
            .filter(|action| !action.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub fn requires(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    #[must_use]
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }

    fn mac(&self, action: &str, session: &str, issued_at: i64) -> AuthResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("invalid CSRF key: {err}")))?;
        mac.update(action.as_bytes());
        mac.update(b"|");
        mac.update(session.as_bytes());
        mac.update(b"|");
        mac.update(issued_at.to_string().as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Mint a token for `action` bound to `session`.
    ///
    /// # Errors
    /// Returns `InvalidCsrfToken` when no secret is configured or the session
    /// nonce is empty.
    pub fn issue(&self, action: &str, session: &str) -> AuthResult<String> {
        if self.secret.expose_secret().is_empty() || session.is_empty() {
            return Err(AuthError::InvalidCsrfToken);
        }
        let issued_at = Utc::now().timestamp();
        let mac = self.mac(action, session, issued_at)?;
        Ok(format!("{issued_at}.{}", URL_SAFE_NO_PAD.encode(mac)))
    }

    /// Check `supplied` for `action`. Actions that are not protected pass.
    ///
    /// # Errors
    /// Returns `InvalidCsrfToken` when the action is protected and the token is
    /// missing, malformed, expired, for another action or session, or when no
    /// secret is configured.
    pub fn validate(
        &self,
        action: &str,
        session: Option<&str>,
        supplied: Option<&str>,
    ) -> AuthResult<()> {
        if !self.requires(action) {
            return Ok(());
        }
        if self.secret.expose_secret().is_empty() {
            debug!(action, "csrf rejected: no secret configured");
            return Err(AuthError::InvalidCsrfToken);
        }
        let (Some(session), Some(supplied)) = (
            session.filter(|s| !s.is_empty()),
            supplied.filter(|s| !s.is_empty()),
        ) else {
            debug!(action, "csrf rejected: token or session missing");
            return Err(AuthError::InvalidCsrfToken);
        };

        let Some((issued_at, encoded)) = supplied.split_once('.') else {
            return Err(AuthError::InvalidCsrfToken);
        };
        let issued_at: i64 = issued_at.parse().map_err(|_| AuthError::InvalidCsrfToken)?;
        let age = Utc::now().timestamp().saturating_sub(issued_at);
        if age < 0 || age > self.ttl_seconds {
            debug!(action, age, "csrf rejected: expired");
            return Err(AuthError::InvalidCsrfToken);
        }
        let presented = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| AuthError::InvalidCsrfToken)?;
        let expected = self.mac(action, session, issued_at)?;
        if bool::from(expected.ct_eq(&presented)) {
            Ok(())
        } else {
            debug!(action, "csrf rejected: mac mismatch");
            Err(AuthError::InvalidCsrfToken)
        }
    }
}

/// How a client decides what to send in the CSRF header for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfSetting {
    /// Fetch a fresh token from the server.
    Generate,
    /// Send this value verbatim.
    Fixed(String),
    /// Send no header at all.
    Omit,
}

impl CsrfSetting {
    /// `true` generates, a non-empty string is used verbatim, anything falsy omits.
    #[must_use]
    pub fn resolve(value: &Value) -> Self {
        match value {
            Value::Bool(true) => Self::Generate,
            Value::String(token) if !token.trim().is_empty() => Self::Fixed(token.clone()),
            _ => Self::Omit,
        }
    }

    /// Header value to send, generating one when asked to.
    ///
    /// # Errors
    /// Propagates the generator's error.
    pub fn header_value<F>(&self, generate: F) -> AuthResult<Option<String>>
    where
        F: FnOnce() -> AuthResult<String>,
    {
        match self {
            Self::Generate => generate().map(Some),
            Self::Fixed(token) => Ok(Some(token.clone())),
            Self::Omit => Ok(None),
        }
    }
}
