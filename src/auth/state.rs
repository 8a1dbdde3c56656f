//! Auth configuration and the shared state handed to every flow.

use secrecy::SecretString;
use std::sync::Arc;

use super::csrf::CsrfGuard;
use super::password::PasswordPolicy;
use super::rate_limit::{NoopRateLimiter, RateLimiter};
use super::service_token::ServiceTokenAuthenticator;
use super::token::AccessTokenIssuer;
use crate::notify::Dispatcher;
use crate::store::Store;

const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_EMAIL_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_INVITE_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_TRUSTED_PROXY_HOPS: usize = 1;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    registration_enabled: bool,
    password_policy: PasswordPolicy,
    refresh_token_ttl_seconds: i64,
    email_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    invite_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    trusted_proxy_hops: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            registration_enabled: true,
            password_policy: PasswordPolicy::default(),
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            email_token_ttl_seconds: DEFAULT_EMAIL_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            invite_ttl_seconds: DEFAULT_INVITE_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            trusted_proxy_hops: DEFAULT_TRUSTED_PROXY_HOPS,
        }
    }

    #[must_use]
    pub fn with_registration_enabled(mut self, enabled: bool) -> Self {
        self.registration_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_invite_ttl_seconds(mut self, seconds: i64) -> Self {
        self.invite_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    /// Number of reverse proxies in front of the service that append to
    /// `X-Forwarded-For`. Zero ignores forwarding headers altogether.
    #[must_use]
    pub fn with_trusted_proxy_hops(mut self, hops: usize) -> Self {
        self.trusted_proxy_hops = hops;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    #[must_use]
    pub fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn email_token_ttl_seconds(&self) -> i64 {
        self.email_token_ttl_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn invite_ttl_seconds(&self) -> i64 {
        self.invite_ttl_seconds
    }

    #[must_use]
    pub fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    #[must_use]
    pub fn trusted_proxy_hops(&self) -> usize {
        self.trusted_proxy_hops
    }

    /// Frontend link carrying a one-time token in the fragment, so it never
    /// reaches server access logs.
    pub(crate) fn frontend_link(&self, path: &str, token: &str) -> String {
        let base = self.frontend_base_url.trim_end_matches('/');
        format!("{base}/{path}#token={token}")
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Everything a request needs: configuration plus the collaborators.
#[derive(Clone)]
pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    rate_limiter: Arc<dyn RateLimiter>,
    csrf: CsrfGuard,
    access_tokens: AccessTokenIssuer,
    service_tokens: ServiceTokenAuthenticator,
}

impl AuthState {
    /// State with log-only notifications, no rate limiting, no CSRF-protected
    /// actions and the service channel closed. Use the `with_*` methods to
    /// enable each guard.
    #[must_use]
    pub fn new(config: AuthConfig, store: Arc<dyn Store>, access_tokens: AccessTokenIssuer) -> Self {
        Self {
            config,
            store,
            dispatcher: Dispatcher::default(),
            rate_limiter: Arc::new(NoopRateLimiter),
            csrf: CsrfGuard::new(SecretString::from("")).with_actions(Vec::<String>::new()),
            access_tokens,
            service_tokens: ServiceTokenAuthenticator::new(SecretString::from("")),
        }
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    #[must_use]
    pub fn with_csrf(mut self, csrf: CsrfGuard) -> Self {
        self.csrf = csrf;
        self
    }

    #[must_use]
    pub fn with_service_tokens(mut self, service_tokens: ServiceTokenAuthenticator) -> Self {
        self.service_tokens = service_tokens;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn access_tokens(&self) -> &AccessTokenIssuer {
        &self.access_tokens
    }

    #[must_use]
    pub fn service_tokens(&self) -> &ServiceTokenAuthenticator {
        &self.service_tokens
    }
}
