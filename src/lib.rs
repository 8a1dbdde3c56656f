//! # Gatehouse (identity and session lifecycle)
//!
//! `gatehouse` registers accounts, verifies email addresses, onboards invited
//! users, resets passwords, authenticates credentials and keeps sessions alive
//! through rotating refresh tokens.
//!
//! ## Tokens
//!
//! Every secret handed to a client (verification links, reset links, invites,
//! refresh tokens) is a random URL-safe string. Only its SHA-256 digest is
//! stored, and every one-time token is consumed by a single conditional
//! update so two concurrent redemptions cannot both succeed.
//!
//! Refresh tokens rotate on every use: the presented token is deleted and a
//! new one issued in the same transaction. Replaying a rotated token fails.
//! Access tokens are short-lived HS256 JWTs and are never stored.
//!
//! ## Guards
//!
//! Mutating endpoints are rate limited per action and client, then checked for
//! a CSRF token bound to the `gatehouse_csrf` session cookie. Flows that could
//! reveal whether an email is registered (password reset, resend verification)
//! answer identically whatever the account state.
//!
//! ## Collaborators
//!
//! Persistence sits behind [`store::Store`] (Postgres or in-memory) and mail
//! behind [`notify::Notifier`]. Notification failures never fail a flow; they
//! surface as `warnings` on the response.

pub mod api;
pub mod auth;
pub mod cli;
pub mod notify;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
