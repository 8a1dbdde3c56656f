use crate::auth::rate_limit::{RateLimit, RateLimitAction};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};
use std::time::Duration;

pub const ARG_RATE_LIMIT_ATTEMPTS: &str = "rate-limit-attempts";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_RATE_LIMIT: &str = "rate-limit";
pub const ARG_TRUSTED_PROXY_HOPS: &str = "trusted-proxy-hops";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub default: RateLimit,
    pub overrides: Vec<(RateLimitAction, RateLimit)>,
    pub trusted_proxy_hops: usize,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let default = RateLimit {
            attempts: matches
                .get_one::<u32>(ARG_RATE_LIMIT_ATTEMPTS)
                .copied()
                .unwrap_or(5),
            window: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_RATE_LIMIT_WINDOW_SECONDS)
                    .copied()
                    .unwrap_or(900),
            ),
        };
        let overrides = matches
            .get_many::<(RateLimitAction, RateLimit)>(ARG_RATE_LIMIT)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        let trusted_proxy_hops = matches
            .get_one::<usize>(ARG_TRUSTED_PROXY_HOPS)
            .copied()
            .unwrap_or(1);
        Self {
            default,
            overrides,
            trusted_proxy_hops,
        }
    }
}

/// Parses `<action>=<attempts>/<seconds>`, e.g. `authenticate=10/60`.
#[must_use]
pub fn validator_rate_limit() -> ValueParser {
    ValueParser::from(
        move |value: &str| -> std::result::Result<(RateLimitAction, RateLimit), String> {
            let (action, limit) = value
                .split_once('=')
                .ok_or_else(|| format!("expected <action>=<attempts>/<seconds>, got {value}"))?;
            Ok((action.parse()?, limit.parse()?))
        },
    )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_ATTEMPTS)
                .long(ARG_RATE_LIMIT_ATTEMPTS)
                .help("Attempts allowed per window for every action; 0 disables rate limiting")
                .env("GATEHOUSE_RATE_LIMIT_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .env("GATEHOUSE_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT)
                .long(ARG_RATE_LIMIT)
                .help("Per-action override as <action>=<attempts>/<seconds> (repeatable)")
                .env("GATEHOUSE_RATE_LIMITS")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(validator_rate_limit()),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXY_HOPS)
                .long(ARG_TRUSTED_PROXY_HOPS)
                .help("Reverse proxies appending to X-Forwarded-For; the client address is taken that many entries from the right, 0 ignores forwarding headers")
                .env("GATEHOUSE_TRUSTED_PROXY_HOPS")
                .default_value("1")
                .value_parser(clap::value_parser!(usize)),
        )
}
