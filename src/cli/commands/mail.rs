use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

pub const ARG_MAIL_GATEWAY_URL: &str = "mail-gateway-url";
pub const ARG_MAIL_TIMEOUT_SECONDS: &str = "mail-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    /// Notifications are only logged when no gateway is configured.
    pub gateway_url: Option<Url>,
    pub timeout: Duration,
}

impl Options {
    /// Parse mail arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the gateway URL is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let gateway_url = matches
            .get_one::<String>(ARG_MAIL_GATEWAY_URL)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| {
                Url::parse(value)
                    .map_err(|err| anyhow::anyhow!("invalid --{ARG_MAIL_GATEWAY_URL}: {err}"))
            })
            .transpose()?;
        let seconds = matches
            .get_one::<u64>(ARG_MAIL_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(5);

        Ok(Self {
            gateway_url,
            timeout: Duration::from_secs(seconds),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_GATEWAY_URL)
                .long(ARG_MAIL_GATEWAY_URL)
                .help("Mail gateway endpoint receiving notifications as JSON")
                .env("GATEHOUSE_MAIL_GATEWAY_URL"),
        )
        .arg(
            Arg::new(ARG_MAIL_TIMEOUT_SECONDS)
                .long(ARG_MAIL_TIMEOUT_SECONDS)
                .help("Upper bound for a single notification dispatch")
                .env("GATEHOUSE_MAIL_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
