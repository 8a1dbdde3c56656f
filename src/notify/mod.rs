//! Outbound notification contract.
//!
//! The engine asks for a transactional message through [`Dispatcher`]; it does
//! not render templates or talk to a provider itself. Each dispatch is a
//! single attempt bounded by a timeout. A failed dispatch never rolls back the
//! state change that triggered it. It is logged with the recipient and
//! template only and reported to the caller as a [`Warning`].
//!
//! Flows whose answer must not depend on whether an account exists use
//! [`Dispatcher::spawn`] and return before the notifier is done.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};
use url::Url;
use utoipa::ToSchema;

pub const TEMPLATE_VERIFY_EMAIL: &str = "verify_email";
pub const TEMPLATE_PASSWORD_RESET: &str = "password_reset";
pub const TEMPLATE_INVITE: &str = "invite";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub template: &'static str,
    pub data: BTreeMap<String, String>,
}

impl Notification {
    #[must_use]
    pub fn new(recipient: impl Into<String>, template: &'static str) -> Self {
        Self {
            recipient: recipient.into(),
            template,
            data: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Delivery abstraction. Implementations may retry internally; the engine
/// never does.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Development notifier: records that a message would have been sent.
///
/// Message data carries one-time links, so only the keys are logged.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            recipient = %notification.recipient,
            template = notification.template,
            "notification send stub"
        );
        debug!(keys = ?notification.data.keys().collect::<Vec<_>>(), "notification data keys");
        Ok(())
    }
}

/// Posts each notification as JSON to a mail gateway.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build mail gateway client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .context("mail gateway request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("mail gateway responded with {status}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed,
}

/// Non-fatal problem reported alongside a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl Warning {
    #[must_use]
    pub fn notification_failed() -> Self {
        Self {
            code: "NOTIFICATION_FAILED".to_string(),
            message: "the notification could not be sent, please retry later".to_string(),
        }
    }
}

impl Delivery {
    #[must_use]
    pub fn warnings(self) -> Vec<Warning> {
        match self {
            Self::Sent => Vec::new(),
            Self::Failed => vec![Warning::notification_failed()],
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier), DEFAULT_TIMEOUT)
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Send once, waiting at most the configured timeout.
    pub async fn dispatch(&self, notification: &Notification) -> Delivery {
        let result = tokio::time::timeout(self.timeout, self.notifier.send(notification)).await;
        match result {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(err)) => {
                warn!(
                    recipient = %notification.recipient,
                    template = notification.template,
                    "notification dispatch failed: {err:#}"
                );
                Delivery::Failed
            }
            Err(_) => {
                warn!(
                    recipient = %notification.recipient,
                    template = notification.template,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "notification dispatch timed out"
                );
                Delivery::Failed
            }
        }
    }

    /// Dispatch in a background task inside the current span.
    pub fn spawn(&self, notification: Notification) -> JoinHandle<Delivery> {
        let dispatcher = self.clone();
        tokio::spawn(
            async move { dispatcher.dispatch(&notification).await }.instrument(Span::current()),
        )
    }
}
