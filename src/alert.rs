//! Human-intervention alerts.
//!
//! The worker dispatches exactly one alert per pause episode (captcha or
//! login); the transport is an external integration detail behind
//! [`AlertDispatcher`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

/// Delivers a notification that a human must intervene.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver one alert. Failures are logged by callers but never block
    /// the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    async fn dispatch(&self, subject: &str, body: &str) -> Result<()>;
}

/// Posts alerts to a webhook as JSON.
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build alert HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertDispatcher for WebhookAlerter {
    async fn dispatch(&self, subject: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "subject": subject, "body": body }))
            .send()
            .await
            .context("Failed to send alert webhook")?;

        if !response.status().is_success() {
            anyhow::bail!("alert webhook returned status {}", response.status());
        }

        info!(subject = %subject, "Alert dispatched");
        Ok(())
    }
}

/// Fallback when no alert destination is configured: the alert only lands
/// in the logs.
pub struct LogAlerter;

#[async_trait]
impl AlertDispatcher for LogAlerter {
    async fn dispatch(&self, subject: &str, body: &str) -> Result<()> {
        warn!(subject = %subject, body = %body, "Alert (no destination configured)");
        Ok(())
    }
}
