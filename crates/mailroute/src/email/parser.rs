//! Raw RFC 822 bytes to [`Email`].

use chrono::{DateTime, Utc};
use log::debug;
use mail_parser::{Address, MessageParser, MimeHeaders};

use crate::classify::Category;
use crate::config::AccountConfig;

use super::error::{EmailError, Result};
use super::message::{AttachmentMeta, Email, NO_SUBJECT};
use super::source::SeqNo;

/// Stateless normalizer for fetched messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailParser;

impl EmailParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses a raw message fetched from `account` at cursor `seq`.
    ///
    /// A missing subject becomes [`NO_SUBJECT`], a missing or unparseable
    /// date becomes `received_at`. The result is unclassified.
    pub fn normalize(
        &self,
        raw: &[u8],
        seq: SeqNo,
        account: &AccountConfig,
        received_at: DateTime<Utc>,
    ) -> Result<Email> {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(EmailError::ParseError(format!(
                "message {} is empty",
                seq
            )));
        }

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| EmailError::ParseError(format!("message {} is not RFC 822", seq)))?;

        let subject = message
            .subject()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_SUBJECT)
            .to_string();

        let date = message
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or(received_at);

        let attachments = message
            .attachments()
            .map(|part| AttachmentMeta {
                filename: part
                    .attachment_name()
                    .unwrap_or("attachment")
                    .to_string(),
                content_type: part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: part.contents().len() as u64,
            })
            .collect::<Vec<_>>();

        let email = Email {
            message_id: message
                .message_id()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            seqno: seq,
            account_id: account.id.clone(),
            account_email: account.username.clone(),
            folder: account.folder.to_lowercase(),
            category: Category::Uncategorized,
            from: format_addresses(message.from()),
            to: format_addresses(message.to()),
            cc: format_addresses(message.cc()),
            bcc: format_addresses(message.bcc()),
            subject,
            date,
            body: message
                .body_text(0)
                .map(|b| b.into_owned())
                .unwrap_or_default(),
            html: message
                .body_html(0)
                .map(|b| b.into_owned())
                .unwrap_or_default(),
            attachments,
            fetched_at: received_at,
            processed: false,
            processed_at: None,
        };

        debug!(
            "Normalized message {} for account '{}': subject={:?} attachments={}",
            seq,
            account.id,
            email.subject,
            email.attachments.len()
        );

        Ok(email)
    }
}

/// Formats an address header as a comma-separated list.
fn format_addresses(address: Option<&Address>) -> String {
    address
        .map(|addr| {
            addr.iter()
                .map(format_address)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// Formats one address as "Name <email@example.com>", or the bare address.
fn format_address(addr: &mail_parser::Addr) -> String {
    match addr.name() {
        Some(name) => format!("{} <{}>", name, addr.address().unwrap_or_default()),
        None => addr.address().unwrap_or_default().to_string(),
    }
}
