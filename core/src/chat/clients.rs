use thiserror::Error;
use tracing::{debug, error};

use crate::{
    chat::slack::{SlackError, SlackWebhook},
    manifest::notifications::NotificationsConfig,
};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Slack error: {0}")]
    Slack(#[from] SlackError),
}

/// Every configured notification sink. Sending is best effort, failures are logged and dropped.
#[derive(Debug, Clone, Default)]
pub struct ChatClients {
    slack: Option<SlackWebhook>,
}

impl ChatClients {
    pub fn new(config: &NotificationsConfig) -> Self {
        Self { slack: config.slack.as_ref().map(|s| SlackWebhook::new(s.webhook_url.clone())) }
    }

    pub fn is_empty(&self) -> bool {
        self.slack.is_none()
    }

    async fn try_notify(&self, message: &str) -> Result<(), ChatError> {
        if let Some(slack) = &self.slack {
            slack.send_message(message).await?;
        }
        Ok(())
    }

    pub async fn notify(&self, message: &str) {
        if self.is_empty() {
            debug!("No notification sinks configured, skipping: {}", message);
            return;
        }

        if let Err(e) = self.try_notify(message).await {
            error!("Could not send notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::notifications::SlackConfig;

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/hook").with_status(500).create_async().await;

        let clients = ChatClients::new(&NotificationsConfig {
            slack: Some(SlackConfig { webhook_url: format!("{}/hook", server.url()) }),
        });
        clients.notify("pipeline started").await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_sinks_is_a_no_op() {
        let clients = ChatClients::new(&NotificationsConfig::default());
        assert!(clients.is_empty());
        clients.notify("nothing to see").await;
    }
}
