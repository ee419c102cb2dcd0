pub mod ai;
pub mod classify;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod index;
pub mod notify;
pub mod pipeline;
pub mod secrets;
pub mod telemetry;

pub use ai::{GeminiClient, ReplyAssistant, RuleStore};
pub use classify::{Category, ClassificationService};
pub use config::{load_config, Config};
pub use db::Database;
pub use email::{
    AccountSession, Email, FolderRouter, ImapConnector, SessionManager, SessionStatus,
};
pub use error::{ConfigError, MailrouteError, Result};
pub use index::{IndexStore, OpenSearchIndex};
pub use notify::NotificationDispatcher;
pub use pipeline::{MessagePipeline, ProcessedMessage};
pub use secrets::{SecretError, SecretSource};
