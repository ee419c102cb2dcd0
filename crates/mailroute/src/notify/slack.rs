//! Chat webhook sink.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{check_response, NotificationPayload, NotificationSink, NotifyError};

pub struct SlackSink {
    client: Client,
    url: String,
}

impl SlackSink {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

/// The chat message body for `payload`.
pub fn slack_message(payload: &NotificationPayload) -> Value {
    let email = &payload.email;
    json!({
        "text": format!(
            "📬 *New {} Email Received*\n*From:* {}\n*Subject:* {}\n*Date:* {}",
            payload.category().display_name(),
            email.from,
            email.subject,
            email.date.format("%Y-%m-%d %H:%M UTC"),
        )
    })
}

#[async_trait]
impl NotificationSink for SlackSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&slack_message(payload))
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        check_response(response).await
    }
}
