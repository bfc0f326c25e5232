//! Delivery of collateral status changes.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use collateral_common::types::{CollateralStatusChanged, WhenDefault};

/// Receiver of status-change notifications.
pub trait StatusNotifier: Send + Sync {
    fn notify(
        &self,
        change: &CollateralStatusChanged,
        when_default: WhenDefault,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Writes status changes to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl StatusNotifier for LogNotifier {
    async fn notify(
        &self,
        change: &CollateralStatusChanged,
        when_default: WhenDefault,
    ) -> anyhow::Result<()> {
        tracing::warn!(
            token = %change.token,
            old = %change.old,
            new = %change.new,
            at = %change.at,
            when_default = %when_default,
            "CollateralStatusChanged"
        );
        Ok(())
    }
}

/// JSON body posted to the status webhook.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    #[serde(flatten)]
    change: &'a CollateralStatusChanged,
    when_default: WhenDefault,
}

/// Posts each status change as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("collateral-keeper")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl StatusNotifier for WebhookNotifier {
    async fn notify(
        &self,
        change: &CollateralStatusChanged,
        when_default: WhenDefault,
    ) -> anyhow::Result<()> {
        LogNotifier.notify(change, when_default).await?;

        let payload = WebhookPayload {
            event: "collateral_status_changed",
            change,
            when_default,
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!(url = %self.url, token = %change.token, "Status webhook delivered");
        Ok(())
    }
}

/// Notifier chosen from configuration at startup.
#[derive(Debug, Clone)]
pub enum Notifier {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl Notifier {
    pub fn from_webhook_url(url: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        match url {
            Some(url) => Ok(Self::Webhook(WebhookNotifier::new(url, timeout)?)),
            None => Ok(Self::Log(LogNotifier)),
        }
    }
}

impl StatusNotifier for Notifier {
    async fn notify(
        &self,
        change: &CollateralStatusChanged,
        when_default: WhenDefault,
    ) -> anyhow::Result<()> {
        match self {
            Self::Log(n) => n.notify(change, when_default).await,
            Self::Webhook(n) => n.notify(change, when_default).await,
        }
    }
}
