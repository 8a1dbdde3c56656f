use crate::auth::{
    csrf::DEFAULT_ACTIONS,
    password::{CharClass, PasswordPolicy},
};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_REGISTRATION_ENABLED: &str = "registration-enabled";
pub const ARG_PASSWORD_MIN_SCORE: &str = "password-min-score";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_PASSWORD_REQUIRE_CLASSES: &str = "password-require-classes";
pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_ACCESS_TOKEN_ISSUER: &str = "access-token-issuer";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_EMAIL_TOKEN_TTL_SECONDS: &str = "email-token-ttl-seconds";
pub const ARG_RESET_TOKEN_TTL_SECONDS: &str = "reset-token-ttl-seconds";
pub const ARG_INVITE_TTL_SECONDS: &str = "invite-ttl-seconds";
pub const ARG_EMAIL_RESEND_COOLDOWN_SECONDS: &str = "email-resend-cooldown-seconds";
pub const ARG_CSRF_SECRET: &str = "csrf-secret";
pub const ARG_CSRF_ACTIONS: &str = "csrf-actions";
pub const ARG_CSRF_TTL_SECONDS: &str = "csrf-ttl-seconds";
pub const ARG_SERVICE_TOKEN: &str = "service-token";

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub registration_enabled: bool,
    pub password_policy: PasswordPolicy,
    pub access_token_secret: SecretString,
    pub access_token_issuer: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: i64,
    pub email_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub invite_ttl_seconds: i64,
    pub email_resend_cooldown_seconds: i64,
    pub csrf: CsrfOptions,
    pub service_token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct CsrfOptions {
    pub secret: Option<SecretString>,
    pub actions: Vec<String>,
    pub ttl_seconds: i64,
}

impl Options {
    /// Parse authentication arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the access token secret is missing or a character
    /// class is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let get_i64 = |id: &str| matches.get_one::<i64>(id).copied().unwrap_or_default();

        let access_token_secret = get_non_empty(ARG_ACCESS_TOKEN_SECRET)
            .map(SecretString::from)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_ACCESS_TOKEN_SECRET}"))?;

        let required_classes = matches
            .get_many::<String>(ARG_PASSWORD_REQUIRE_CLASSES)
            .into_iter()
            .flatten()
            .map(|class| class.trim())
            .filter(|class| !class.is_empty())
            .map(|class| class.parse::<CharClass>().map_err(anyhow::Error::msg))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let password_policy = PasswordPolicy {
            min_score: matches
                .get_one::<u8>(ARG_PASSWORD_MIN_SCORE)
                .copied()
                .unwrap_or(2),
            min_length: matches
                .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                .copied()
                .unwrap_or(8),
            required_classes,
        };

        let csrf_actions = matches
            .get_many::<String>(ARG_CSRF_ACTIONS)
            .map_or_else(
                || DEFAULT_ACTIONS.iter().map(ToString::to_string).collect(),
                |values| values.cloned().collect(),
            );

        Ok(Self {
            frontend_base_url: get_non_empty(ARG_FRONTEND_BASE_URL)
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            registration_enabled: matches
                .get_one::<bool>(ARG_REGISTRATION_ENABLED)
                .copied()
                .unwrap_or(true),
            password_policy,
            access_token_secret,
            access_token_issuer: get_non_empty(ARG_ACCESS_TOKEN_ISSUER)
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            access_token_ttl_seconds: matches
                .get_one::<u64>(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_seconds: get_i64(ARG_REFRESH_TOKEN_TTL_SECONDS),
            email_token_ttl_seconds: get_i64(ARG_EMAIL_TOKEN_TTL_SECONDS),
            reset_token_ttl_seconds: get_i64(ARG_RESET_TOKEN_TTL_SECONDS),
            invite_ttl_seconds: get_i64(ARG_INVITE_TTL_SECONDS),
            email_resend_cooldown_seconds: get_i64(ARG_EMAIL_RESEND_COOLDOWN_SECONDS),
            csrf: CsrfOptions {
                secret: get_non_empty(ARG_CSRF_SECRET).map(SecretString::from),
                actions: csrf_actions,
                ttl_seconds: get_i64(ARG_CSRF_TTL_SECONDS),
            },
            service_token: get_non_empty(ARG_SERVICE_TOKEN).map(SecretString::from),
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_account_args(command);
    let command = with_token_args(command);
    with_guard_args(command)
}

fn ttl_arg(id: &'static str, env: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(i64).range(1..))
}

fn with_account_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for links in notifications")
                .env("GATEHOUSE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_ENABLED)
                .long(ARG_REGISTRATION_ENABLED)
                .help("Allow self-service registration")
                .env("GATEHOUSE_REGISTRATION_ENABLED")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_SCORE)
                .long(ARG_PASSWORD_MIN_SCORE)
                .help("Minimum password strength score (0-4)")
                .env("GATEHOUSE_PASSWORD_MIN_SCORE")
                .default_value("2")
                .value_parser(clap::value_parser!(u8).range(0..=4)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length in characters")
                .env("GATEHOUSE_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_REQUIRE_CLASSES)
                .long(ARG_PASSWORD_REQUIRE_CLASSES)
                .help("Character classes every password must contain: lower,upper,digit,symbol")
                .env("GATEHOUSE_PASSWORD_REQUIRE_CLASSES")
                .value_delimiter(','),
        )
        .arg(ttl_arg(
            ARG_EMAIL_TOKEN_TTL_SECONDS,
            "GATEHOUSE_EMAIL_TOKEN_TTL_SECONDS",
            "Email verification token TTL in seconds",
            "1800",
        ))
        .arg(ttl_arg(
            ARG_RESET_TOKEN_TTL_SECONDS,
            "GATEHOUSE_RESET_TOKEN_TTL_SECONDS",
            "Password reset token TTL in seconds",
            "3600",
        ))
        .arg(ttl_arg(
            ARG_INVITE_TTL_SECONDS,
            "GATEHOUSE_INVITE_TTL_SECONDS",
            "Invite TTL in seconds",
            "604800",
        ))
        .arg(ttl_arg(
            ARG_EMAIL_RESEND_COOLDOWN_SECONDS,
            "GATEHOUSE_EMAIL_RESEND_COOLDOWN_SECONDS",
            "Cooldown before resending verification emails",
            "60",
        ))
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("HMAC secret for signing access tokens")
                .env("GATEHOUSE_ACCESS_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_ISSUER)
                .long(ARG_ACCESS_TOKEN_ISSUER)
                .help("Issuer claim for access tokens")
                .env("GATEHOUSE_ACCESS_TOKEN_ISSUER")
                .default_value("gatehouse"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("GATEHOUSE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(ttl_arg(
            ARG_REFRESH_TOKEN_TTL_SECONDS,
            "GATEHOUSE_REFRESH_TOKEN_TTL_SECONDS",
            "Refresh token TTL in seconds",
            "2592000",
        ))
        .arg(
            Arg::new(ARG_SERVICE_TOKEN)
                .long(ARG_SERVICE_TOKEN)
                .help("Shared secret for service-to-service calls; empty rejects every call")
                .env("GATEHOUSE_SERVICE_TOKEN")
                .hide_env_values(true),
        )
}

fn with_guard_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CSRF_SECRET)
                .long(ARG_CSRF_SECRET)
                .help("HMAC secret for CSRF tokens; CSRF checks are off without it")
                .env("GATEHOUSE_CSRF_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_CSRF_ACTIONS)
                .long(ARG_CSRF_ACTIONS)
                .help("Actions that require a CSRF token")
                .env("GATEHOUSE_CSRF_ACTIONS")
                .value_delimiter(','),
        )
        .arg(ttl_arg(
            ARG_CSRF_TTL_SECONDS,
            "GATEHOUSE_CSRF_TTL_SECONDS",
            "CSRF token TTL in seconds",
            "3600",
        ))
}
