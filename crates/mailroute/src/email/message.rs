//! Canonical parsed message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::Category;

use super::source::SeqNo;

/// Placeholder subject for messages without one.
pub const NO_SUBJECT: &str = "(No Subject)";

/// Metadata of one attachment; the content itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

/// A normalized message as written to the index store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    /// Message-ID header; absent for some automated senders.
    pub message_id: Option<String>,
    pub seqno: SeqNo,
    pub account_id: String,
    pub account_email: String,
    pub folder: String,
    pub category: Category,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub html: String,
    pub attachments: Vec<AttachmentMeta>,
    pub fetched_at: DateTime<Utc>,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Email {
    /// Records the classification outcome.
    pub fn mark_classified(&mut self, category: Category, now: DateTime<Utc>) {
        self.category = category;
        self.processed = true;
        self.processed_at = Some(now);
    }
}
