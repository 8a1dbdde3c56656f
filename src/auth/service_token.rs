//! Shared-secret authentication for internal callers.
//!
//! This channel never carries user roles. A successful check yields the fixed
//! [`ServiceIdentity`], which only grants the internal maintenance scope.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceScope {
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: &'static str,
    pub scope: ServiceScope,
}

impl ServiceIdentity {
    const INTERNAL: Self = Self {
        name: "internal-service",
        scope: ServiceScope::Maintenance,
    };
}

#[derive(Clone)]
pub struct ServiceTokenAuthenticator {
    secret: SecretString,
}

impl std::fmt::Debug for ServiceTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTokenAuthenticator")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl ServiceTokenAuthenticator {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.secret.expose_secret().is_empty()
    }

    /// # Errors
    /// Returns `InvalidServiceToken` when no secret is configured or the
    /// presented value differs.
    pub fn authenticate(&self, presented: Option<&str>) -> AuthResult<ServiceIdentity> {
        if !self.is_configured() {
            debug!("service token rejected: no secret configured");
            return Err(AuthError::InvalidServiceToken);
        }
        let Some(presented) = presented else {
            return Err(AuthError::InvalidServiceToken);
        };
        // Compare fixed-length digests so the length of the secret is not leaked.
        let expected = Sha256::digest(self.secret.expose_secret().as_bytes());
        let actual = Sha256::digest(presented.as_bytes());
        if bool::from(expected.as_slice().ct_eq(actual.as_slice())) {
            Ok(ServiceIdentity::INTERNAL)
        } else {
            Err(AuthError::InvalidServiceToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secret_yields_internal_identity() -> AuthResult<()> {
        let auth = ServiceTokenAuthenticator::new(SecretString::from("s3cret"));
        let identity = auth.authenticate(Some("s3cret"))?;
        assert_eq!(identity.name, "internal-service");
        assert_eq!(identity.scope, ServiceScope::Maintenance);
        Ok(())
    }

    #[test]
    fn wrong_or_missing_secret_rejects() {
        let auth = ServiceTokenAuthenticator::new(SecretString::from("s3cret"));
        assert!(auth.authenticate(Some("s3cret ")).is_err());
        assert!(auth.authenticate(Some("")).is_err());
        assert!(auth.authenticate(None).is_err());
    }

    #[test]
    fn empty_configured_secret_always_rejects() {
        let auth = ServiceTokenAuthenticator::new(SecretString::from(""));
        assert!(!auth.is_configured());
        assert!(matches!(
            auth.authenticate(Some("")),
            Err(AuthError::InvalidServiceToken)
        ));
    }
}
