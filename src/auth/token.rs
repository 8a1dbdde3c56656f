//! Opaque token generation and stateless access tokens.
//!
//! Opaque tokens (email verification, password reset, invites, refresh) come
//! straight from the operating system RNG. If that source fails the request
//! fails; there is no fallback to a weaker generator.
//!
//! Only SHA-256 digests of opaque tokens are persisted. The raw value is
//! handed to the client once and looked up by digest afterwards.

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::roles::Roles;
use crate::store::User;

/// Minimum entropy for any server-issued token (128 bits).
pub const MIN_TOKEN_BYTES: usize = 16;
/// Default size for opaque tokens (256 bits).
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Generate `byte_length` random bytes from the OS RNG, base64url encoded.
///
/// # Errors
/// Returns an error if fewer than [`MIN_TOKEN_BYTES`] are requested or the
/// secure random source is unavailable.
pub fn generate(byte_length: usize) -> Result<String> {
    if byte_length < MIN_TOKEN_BYTES {
        return Err(anyhow!(
            "refusing to generate a {byte_length}-byte token, minimum is {MIN_TOKEN_BYTES}"
        ));
    }
    let mut bytes = vec![0u8; byte_length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("secure random source unavailable")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a default-size opaque token.
///
/// # Errors
/// Returns an error if the secure random source is unavailable.
pub fn generate_token() -> Result<String> {
    generate(DEFAULT_TOKEN_BYTES)
}

/// Digest used as the storage key for an opaque token.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub roles: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl AccessClaims {
    /// Subject as a user id.
    ///
    /// # Errors
    /// Returns `Unauthenticated` if the subject is not a UUID.
    pub fn user_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::Unauthenticated)
    }

    #[must_use]
    pub fn roles(&self) -> Roles {
        Roles::from_strings(&self.roles)
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: u64,
}

/// Signs and validates short-lived HS256 access tokens.
#[derive(Clone)]
pub struct AccessTokenIssuer {
    secret: SecretString,
    issuer: String,
    ttl_seconds: u64,
}

impl std::fmt::Debug for AccessTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenIssuer")
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl AccessTokenIssuer {
    #[must_use]
    pub fn new(secret: SecretString, issuer: String, ttl_seconds: u64) -> Self {
        Self {
            secret,
            issuer,
            ttl_seconds,
        }
    }

    /// Issue an access token for `user`.
    ///
    /// # Errors
    /// Returns an error if the secret is empty or signing fails.
    pub fn issue(&self, user: &User) -> Result<AccessToken> {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            return Err(anyhow!("access token secret is not configured"));
        }
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            roles: user.roles.to_strings(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX)),
            jti: Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .context("failed to sign access token")?;
        Ok(AccessToken {
            token,
            expires_in: self.ttl_seconds,
        })
    }

    /// Validate signature, expiry and issuer.
    ///
    /// # Errors
    /// Returns `Unauthenticated` for any invalid token.
    pub fn validate(&self, token: &str) -> AuthResult<AccessClaims> {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);
        validation.leeway = 0;

        jsonwebtoken::decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            debug!("rejected access token: {err}");
            AuthError::Unauthenticated
        })
    }
}
