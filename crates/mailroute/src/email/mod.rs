//! Mail source: IMAP sessions, message normalization, folder routing and
//! per-account progress.
//!
//! Everything above the protocol talks to [`MailConnector`] and
//! [`MailSession`]; [`ImapConnector`] is the production implementation.

pub mod client;
pub mod error;
pub mod manager;
pub mod message;
pub mod parser;
pub mod router;
pub mod session;
pub mod source;
pub mod tracker;

pub use client::{ImapClient, ImapConnector};
pub use error::EmailError;
pub use manager::{RunningSessions, SessionManager};
pub use message::{AttachmentMeta, Email, NO_SUBJECT};
pub use parser::EmailParser;
pub use router::{find_folder, resolve_folder, FolderRouter, RouteMode};
pub use session::{AccountSession, ConnectionState, ScanSummary, SessionStatus};
pub use source::{FolderInfo, FolderStatus, MailConnector, MailEvent, MailSession, SeqNo};
pub use tracker::ProgressTracker;
