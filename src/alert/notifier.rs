//! Alert delivery to a Slack-compatible webhook.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::db::{MonitoredTarget, ProbeOutcome};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no webhook configured")]
    NotConfigured,
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Best-effort alert sink. Both methods report delivery as a bool and never
/// fail the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(
        &self,
        target: &MonitoredTarget,
        outcome: &ProbeOutcome,
        consecutive_failures: u32,
    ) -> bool;

    async fn notify_recovery(&self, target: &MonitoredTarget) -> bool;
}

/// Posts block-formatted messages to an incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, webhook_url }
    }

    async fn post(&self, message: &Value) -> Result<(), NotifyError> {
        let url = self.webhook_url.as_deref().ok_or(NotifyError::NotConfigured)?;
        self.client
            .post(url)
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify_failure(
        &self,
        target: &MonitoredTarget,
        outcome: &ProbeOutcome,
        consecutive_failures: u32,
    ) -> bool {
        match self.post(&failure_message(target, outcome, consecutive_failures)).await {
            Ok(()) => {
                tracing::info!("Alert sent for {} ({})", target.name, target.id);
                true
            }
            Err(NotifyError::NotConfigured) => {
                tracing::info!("No webhook configured, skipping failure alert for {}", target.name);
                false
            }
            Err(e) => {
                tracing::error!("Error sending failure alert for {}: {}", target.name, e);
                false
            }
        }
    }

    async fn notify_recovery(&self, target: &MonitoredTarget) -> bool {
        match self.post(&recovery_message(target)).await {
            Ok(()) => {
                tracing::info!("Recovery alert sent for {} ({})", target.name, target.id);
                true
            }
            Err(NotifyError::NotConfigured) => false,
            Err(e) => {
                tracing::error!("Error sending recovery alert for {}: {}", target.name, e);
                false
            }
        }
    }
}

fn failure_message(
    target: &MonitoredTarget,
    outcome: &ProbeOutcome,
    consecutive_failures: u32,
) -> Value {
    let status_code = if outcome.status_code == 0 {
        "N/A".to_string()
    } else {
        outcome.status_code.to_string()
    };
    let error = outcome.error.as_deref().unwrap_or("No error message");
    let website = format!("*Website:*\n<{}|{}>", target.url, target.name);
    let streak = format!(
        "The website has been down for {} consecutive checks.",
        consecutive_failures
    );

    json!({
        "text": "⚠️ URL Monitor Alert: Website Down",
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "⚠️ Website Down Alert", "emoji": true }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": website },
                    { "type": "mrkdwn", "text": "*Status:*\n❌ Down" }
                ]
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Status Code:*\n{}", status_code) },
                    { "type": "mrkdwn", "text": format!("*Error:*\n{}", error) }
                ]
            },
            {
                "type": "context",
                "elements": [
                    { "type": "mrkdwn", "text": streak }
                ]
            }
        ]
    })
}

fn recovery_message(target: &MonitoredTarget) -> Value {
    let website = format!("*Website:*\n<{}|{}>", target.url, target.name);
    json!({
        "text": "✅ URL Monitor Recovery: Website Back Online",
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "✅ Website Recovered", "emoji": true }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": website },
                    { "type": "mrkdwn", "text": "*Status:*\n✅ Online" }
                ]
            },
            {
                "type": "context",
                "elements": [
                    {
                        "type": "mrkdwn",
                        "text": "The website is now online after previous downtime."
                    }
                ]
            }
        ]
    })
}
