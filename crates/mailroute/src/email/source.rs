//! Protocol-agnostic view of a mailbox connection.
//!
//! The session manager, the folder router and the tests only talk to these
//! traits; [`super::client::ImapConnector`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AccountConfig;

use super::error::Result;

/// Progress cursor for a message within a folder (the IMAP UID).
pub type SeqNo = u32;

/// State of a folder right after it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderStatus {
    /// Number of messages in the folder.
    pub exists: u32,
    /// Epoch of the folder's cursors; cursors from another epoch are meaningless.
    pub uid_validity: Option<u32>,
    /// Cursor the server will assign to the next arriving message.
    pub uid_next: Option<u32>,
}

impl FolderStatus {
    /// Number of messages that arrived between `earlier` and `self`.
    ///
    /// Counts assigned cursors rather than folder size, so messages moved
    /// out by other connections cannot hide arrivals. Falls back to the
    /// size delta when the server does not report `uid_next`.
    pub fn arrivals_since(&self, earlier: &FolderStatus) -> i64 {
        match (self.uid_next, earlier.uid_next) {
            (Some(now), Some(before)) if self.uid_validity == earlier.uid_validity => {
                i64::from(now) - i64::from(before)
            }
            (Some(_), Some(_)) => i64::from(self.exists),
            _ => i64::from(self.exists) - i64::from(earlier.exists),
        }
    }
}

/// One entry of the folder hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    /// Full name as the server reports it, e.g. `INBOX.Spam`.
    pub name: String,
    /// Hierarchy delimiter, if the server reported one.
    pub delimiter: Option<String>,
}

impl FolderInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: None,
        }
    }
}

/// Lifecycle signals surfaced while waiting on an idle connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailEvent {
    /// The folder changed. `count` is the number of arrivals and is zero
    /// when only expunges happened.
    NewMail { count: i64 },
    /// Nothing happened before the wait elapsed.
    KeepAlive,
    /// The server ended the connection.
    Closed,
}

/// An authenticated connection to one account.
#[async_trait]
pub trait MailSession: Send {
    /// Selects a folder for reading and moving.
    async fn open_folder(&mut self, folder: &str) -> Result<FolderStatus>;

    /// Cursors of messages received on or after `since`, in server order.
    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<SeqNo>>;

    /// The Message-ID header of one message, without fetching the body.
    async fn fetch_message_id(&mut self, seq: SeqNo) -> Result<Option<String>>;

    /// The full RFC 822 message, without marking it as read.
    async fn fetch(&mut self, seq: SeqNo) -> Result<Vec<u8>>;

    async fn list_folders(&mut self) -> Result<Vec<FolderInfo>>;

    /// Creates a folder. Returns [`super::EmailError::FolderExists`] if the
    /// server reports the folder is already there.
    async fn create_folder(&mut self, name: &str) -> Result<()>;

    async fn move_message(&mut self, seq: SeqNo, folder: &str) -> Result<()>;

    async fn copy_message(&mut self, seq: SeqNo, folder: &str) -> Result<()>;

    /// Waits up to `max_wait` for the connection to signal something.
    async fn next_event(&mut self, max_wait: Duration) -> Result<MailEvent>;

    async fn logout(&mut self) -> Result<()>;
}

/// Opens sessions for an account.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailSession>>;
}
