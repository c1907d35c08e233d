mod clients;
mod slack;

pub use clients::{ChatClients, ChatError};
pub use slack::{SlackError, SlackWebhook};

pub const PIPELINE_STARTED_MESSAGE: &str = ":repeat: Insurance ETL pipeline started.";
pub const PIPELINE_SUCCEEDED_MESSAGE: &str = "✅ Insurance ETL pipeline executed successfully.";

pub fn pipeline_failed_message(error: &str) -> String {
    format!("🔴 ETL pipeline failed: {}", error)
}
