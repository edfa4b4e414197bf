use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::config::NotificationConfig;
use crate::message::Email;

const CHAT_PREVIEW_CHARS: usize = 200;
const WEBHOOK_PREVIEW_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(String),
    #[error("notification sink returned status {0}")]
    Status(u16),
}

/// Two independent sinks for interested messages. Each call is
/// best-effort: failures are reported to the caller for logging and are
/// never retried; an unconfigured sink logs and no-ops.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn chat_alert(&self, email: &Email) -> Result<(), NotifyError>;
    async fn webhook_event(&self, email: &Email) -> Result<(), NotifyError>;
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    slack_webhook: Option<Url>,
    webhook: Option<Url>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(WebhookNotifier {
            client,
            slack_webhook: parse_sink("slack_webhook_url", &config.slack_webhook_url),
            webhook: parse_sink("webhook_url", &config.webhook_url),
        })
    }
}

fn parse_sink(name: &str, value: &str) -> Option<Url> {
    if value.is_empty() {
        return None;
    }
    match Url::parse(value) {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("Ignoring invalid {name} '{value}': {e}");
            None
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn chat_alert(&self, email: &Email) -> Result<(), NotifyError> {
        let url = match &self.slack_webhook {
            Some(url) => url.clone(),
            None => {
                log::warn!("Slack webhook URL not configured, skipping chat alert");
                return Ok(());
            }
        };
        let response = self
            .client
            .post(url)
            .json(&chat_payload(email))
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        log::info!("Chat alert sent for {}", email.id);
        Ok(())
    }

    async fn webhook_event(&self, email: &Email) -> Result<(), NotifyError> {
        let url = match &self.webhook {
            Some(url) => url.clone(),
            None => {
                log::warn!("Webhook URL not configured, skipping event");
                return Ok(());
            }
        };
        let response = self
            .client
            .post(url)
            .header("X-Event-Type", "email.interested")
            .json(&webhook_payload(email))
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        log::info!("Webhook triggered for {}", email.id);
        Ok(())
    }
}

fn preview(email: &Email, max_chars: usize) -> String {
    let text = if email.text_body.is_empty() {
        &email.body
    } else {
        &email.text_body
    };
    text.chars().take(max_chars).collect()
}

/// Slack Block Kit payload announcing an interested message.
fn chat_payload(email: &Email) -> Value {
    json!({
        "text": "New Interested Email Received!",
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "New Interested Email", "emoji": true }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*From:*\n{}", email.from) },
                    { "type": "mrkdwn", "text": format!("*Account:*\n{}", email.account_id) },
                    { "type": "mrkdwn", "text": format!("*Subject:*\n{}", email.subject) },
                    { "type": "mrkdwn", "text": format!("*Date:*\n{}", email.date.format("%Y-%m-%d %H:%M:%S UTC")) },
                ]
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Preview:*\n{}...", preview(email, CHAT_PREVIEW_CHARS))
                }
            }
        ]
    })
}

fn webhook_payload(email: &Email) -> Value {
    json!({
        "event": "email.interested",
        "timestamp": Utc::now().to_rfc3339(),
        "email": {
            "id": email.id,
            "account_id": email.account_id,
            "from": email.from,
            "to": email.to,
            "subject": email.subject,
            "preview": preview(email, WEBHOOK_PREVIEW_CHARS),
            "date": email.date,
            "category": email.category,
            "folder": email.folder,
        }
    })
}
