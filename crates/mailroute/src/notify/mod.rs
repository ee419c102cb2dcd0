//! Best-effort notifications for classified messages.
//!
//! Every sink is invoked independently; failures are logged and counted but
//! never reach the caller.

pub mod slack;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;

use crate::classify::Category;
use crate::config::NotificationSettings;
use crate::email::Email;
use crate::secrets::SecretError;

pub use slack::SlackSink;
pub use webhook::WebhookSink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Notification endpoint not configured: {0}")]
    Secret(#[from] SecretError),
}

/// Alert content: the message with its resolved category.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub event: String,
    #[serde(flatten)]
    pub email: Email,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(email: &Email, category: Category, timestamp: DateTime<Utc>) -> Self {
        let mut email = email.clone();
        email.category = category;
        Self {
            event: category.event_name(),
            email,
            timestamp,
        }
    }

    pub fn category(&self) -> Category {
        self.email.category
    }
}

/// One notification destination.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct NotificationDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
    triggers: Vec<Category>,
}

impl NotificationDispatcher {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>, triggers: Vec<Category>) -> Self {
        Self { sinks, triggers }
    }

    /// Builds the sinks whose endpoints are configured.
    pub fn from_settings(settings: &NotificationSettings) -> Result<Self, NotifyError> {
        let client = http_client()?;
        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();

        if let Some(url) = settings.slack_webhook_url.resolve_optional()? {
            sinks.push(Box::new(SlackSink::new(
                client.clone(),
                url.expose_secret().to_string(),
            )));
        }
        if let Some(url) = settings.webhook_url.resolve_optional()? {
            sinks.push(Box::new(WebhookSink::new(
                client,
                url.expose_secret().to_string(),
            )));
        }

        if sinks.is_empty() {
            info!("No notification sinks configured");
        }
        Ok(Self::new(sinks, settings.trigger_categories()))
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_triggered(&self, category: Category) -> bool {
        self.triggers.contains(&category)
    }

    /// Sends `email` to every sink if `category` is a trigger.
    pub async fn dispatch(&self, email: &Email, category: Category) -> DispatchReport {
        if !self.is_triggered(category) || self.sinks.is_empty() {
            debug!("No notification for category '{}'", category);
            return DispatchReport::default();
        }

        let payload = NotificationPayload::new(email, category, Utc::now());
        let results = join_all(self.sinks.iter().map(|sink| {
            let payload = &payload;
            async move { (sink.name(), sink.send(payload).await) }
        }))
        .await;

        let mut report = DispatchReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => {
                    debug!("Notification sent via {}", name);
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!("Notification via {} failed: {}", name, e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

pub(crate) fn http_client() -> Result<Client, NotifyError> {
    Ok(Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

/// Maps non-2xx responses to [`NotifyError::Status`].
pub(crate) async fn check_response(response: Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    let mut end = body.len().min(MAX_ERROR_BODY_LENGTH);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    Err(NotifyError::Status {
        status: status.as_u16(),
        body: body[..end].to_string(),
    })
}
