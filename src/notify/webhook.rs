use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use crate::{
    error::{ComplianceError, Result},
    notify::{Notifier, NotifyEvent},
};

/// POSTs `{event, data, timestamp}` to a single URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("lead-compliance/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, url: url.to_string() })
    }

    pub fn payload(event: &NotifyEvent) -> serde_json::Value {
        json!({
            "event": event.name(),
            "data": event,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, event: &NotifyEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("X-Event-Type", event.name())
            .json(&Self::payload(event))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComplianceError::Other(anyhow::anyhow!(
                "webhook responded with {}: {}",
                status,
                body
            )));
        }
        Ok(())
    }
}
