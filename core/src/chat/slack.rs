use reqwest::Client;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlackError {
    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Slack webhook error {0}: {1}")]
    ApiError(u16, String),
}

/// Posts plain text messages to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackWebhook {
    client: Client,
    webhook_url: String,
}

impl SlackWebhook {
    pub fn new(webhook_url: String) -> Self {
        let client = Client::new();
        Self { client, webhook_url }
    }

    pub async fn send_message(&self, message: &str) -> Result<(), SlackError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(&json!({ "text": message }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SlackError::ApiError(status.as_u16(), body))
        }
    }
}
