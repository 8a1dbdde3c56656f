use crate::{
    api,
    auth::{
        AuthConfig, AuthState,
        csrf::CsrfGuard,
        rate_limit::FixedWindowRateLimiter,
        service_token::ServiceTokenAuthenticator,
        token::AccessTokenIssuer,
    },
    cli::{
        commands::{auth, limits, mail},
        telemetry,
    },
    notify::{Dispatcher, LogNotifier, Notifier, WebhookNotifier},
    store::{MemoryStore, PgStore, Store},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub auth: auth::Options,
    pub limits: limits::Options,
    pub mail: mail::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let state = build_state(args.auth, args.limits, args.mail, args.dsn).await?;

    let result = api::serve(args.port, Arc::new(state)).await;

    telemetry::shutdown_tracer();

    result
}

async fn build_store(dsn: Option<SecretString>) -> Result<Arc<dyn Store>> {
    if let Some(dsn) = dsn {
        let store = PgStore::connect(&dsn).await?;
        store.apply_schema().await?;
        info!("Connected to Postgres store");
        Ok(Arc::new(store))
    } else {
        warn!("No DSN configured: using the in-memory store, data is lost on restart");
        Ok(Arc::new(MemoryStore::new()))
    }
}

fn build_dispatcher(mail: mail::Options) -> Result<Dispatcher> {
    let notifier: Arc<dyn Notifier> = match mail.gateway_url {
        Some(url) => {
            info!("Delivering notifications to {url}");
            Arc::new(WebhookNotifier::new(url, mail.timeout)?)
        }
        None => {
            warn!("No mail gateway configured: notifications are only logged");
            Arc::new(LogNotifier)
        }
    };
    Ok(Dispatcher::new(notifier, mail.timeout))
}

/// Assemble the shared state from parsed options.
///
/// # Errors
/// Returns an error if the store or mail gateway client cannot be set up.
pub async fn build_state(
    auth: auth::Options,
    limits: limits::Options,
    mail: mail::Options,
    dsn: Option<SecretString>,
) -> Result<AuthState> {
    let store = build_store(dsn).await?;

    let config = AuthConfig::new(auth.frontend_base_url)
        .with_registration_enabled(auth.registration_enabled)
        .with_password_policy(auth.password_policy)
        .with_refresh_token_ttl_seconds(auth.refresh_token_ttl_seconds)
        .with_email_token_ttl_seconds(auth.email_token_ttl_seconds)
        .with_reset_token_ttl_seconds(auth.reset_token_ttl_seconds)
        .with_invite_ttl_seconds(auth.invite_ttl_seconds)
        .with_resend_cooldown_seconds(auth.email_resend_cooldown_seconds)
        .with_trusted_proxy_hops(limits.trusted_proxy_hops);

    let access_tokens = AccessTokenIssuer::new(
        auth.access_token_secret,
        auth.access_token_issuer,
        auth.access_token_ttl_seconds,
    );

    let mut rate_limiter = FixedWindowRateLimiter::new(limits.default);
    for (action, limit) in limits.overrides {
        rate_limiter = rate_limiter.with_limit(action, limit);
    }

    let mut state = AuthState::new(config, store, access_tokens)
        .with_dispatcher(build_dispatcher(mail)?)
        .with_rate_limiter(Arc::new(rate_limiter));

    if let Some(secret) = auth.csrf.secret {
        state = state.with_csrf(
            CsrfGuard::new(secret)
                .with_ttl_seconds(auth.csrf.ttl_seconds)
                .with_actions(auth.csrf.actions),
        );
    } else {
        warn!("No CSRF secret configured: CSRF checks are disabled");
    }

    match auth.service_token {
        Some(token) => {
            state = state.with_service_tokens(ServiceTokenAuthenticator::new(token));
        }
        None => info!("No service token configured: internal endpoints reject every call"),
    }

    Ok(state)
}
