//! Alert Notifiers
//!
//! The live subscriber seam and the outbound channel seam. Each channel is
//! invoked independently; a failing channel never affects its siblings.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::alert::Alert;

/// Default timeout for outbound webhook requests
pub const WEBHOOK_TIMEOUT_MS: u64 = 10_000;

/// Errors raised by notification channels
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel responded with status {0}")]
    Status(u16),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Fire-and-forget fan-out to live subscribers
#[async_trait]
pub trait LiveNotifier: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// An outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes each alert as a structured log line
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        warn!(
            tx_hash = %alert.tx_hash,
            block = alert.block_number,
            rule = %alert.rule,
            severity = %alert.severity,
            "Compliance alert: {}",
            alert.details
        );
        Ok(())
    }
}

/// Webhook channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
}

/// POSTs `{ "text": <summary>, "alert": <alert> }` to a chat-style webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(WEBHOOK_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// JSON body posted to webhooks
pub fn webhook_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "text": alert.summary(),
        "alert": alert,
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(&webhook_payload(alert)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}
