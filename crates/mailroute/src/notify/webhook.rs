//! Generic JSON webhook sink.

use async_trait::async_trait;
use reqwest::Client;

use super::{check_response, NotificationPayload, NotificationSink, NotifyError};

pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        check_response(response).await
    }
}
