use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::classify::Category;
use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub reply: ReplySettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl Config {
    /// Accounts with `enabled: true`, in configuration order.
    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }
}

/// One mailbox the daemon keeps a session open for.
///
/// Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    /// Stable identity used for progress records and index documents.
    pub id: String,

    /// Login name, typically the email address.
    pub username: String,

    /// IMAP server hostname (e.g., "imap.gmail.com").
    pub host: String,

    /// IMAP server port (default: 993 for IMAPS).
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Whether to use TLS (required for security).
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Accept self-signed or otherwise invalid server certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    pub auth: AuthSettings,

    /// Folder watched for new mail (default: "INBOX").
    #[serde(default = "default_inbox")]
    pub folder: String,

    /// Category label to destination folder overrides.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AccountConfig {
    /// Destination folder for a category.
    ///
    /// An entry in `labels` wins; otherwise the category's folder slug.
    pub fn folder_for(&self, category: Category) -> String {
        self.labels
            .iter()
            .find(|(label, _)| Category::parse_label(label) == category)
            .map(|(_, folder)| folder.clone())
            .unwrap_or_else(|| category.folder_slug())
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_true() -> bool {
    true
}

/// Email authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Password,
    OAuth2,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,

    /// Password for LOGIN authentication.
    #[serde(default)]
    pub password: SecretSource,

    /// Pre-issued OAuth2 access token for XOAUTH2 authentication.
    #[serde(default)]
    pub access_token: SecretSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierSettings {
    #[serde(default = "default_api_key")]
    pub api_key: SecretSource,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
    #[serde(default = "default_reservoir")]
    pub reservoir: u32,
    #[serde(default = "default_refill_interval")]
    pub refill_interval_secs: u64,
    #[serde(default = "default_jitter_min")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    /// Ceiling for server-requested retry delays.
    #[serde(default = "default_max_server_delay")]
    pub max_server_delay_secs: u64,
}

fn default_api_key() -> SecretSource {
    SecretSource::env("GEMINI_API_KEY")
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_embedding_model() -> String {
    "embedding-001".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    5
}

fn default_min_interval() -> u64 {
    6000
}

fn default_reservoir() -> u32 {
    10
}

fn default_refill_interval() -> u64 {
    60
}

fn default_jitter_min() -> u64 {
    1000
}

fn default_jitter_max() -> u64 {
    2000
}

fn default_max_backoff() -> u64 {
    60
}

fn default_base_backoff() -> u64 {
    2000
}

fn default_max_server_delay() -> u64 {
    300
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            max_attempts: default_max_attempts(),
            min_interval_ms: default_min_interval(),
            reservoir: default_reservoir(),
            refill_interval_secs: default_refill_interval(),
            jitter_min_ms: default_jitter_min(),
            jitter_max_ms: default_jitter_max(),
            max_backoff_secs: default_max_backoff(),
            base_backoff_ms: default_base_backoff(),
            max_server_delay_secs: default_max_server_delay(),
        }
    }
}

impl ClassifierSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_server_delay(&self) -> Duration {
        Duration::from_secs(self.max_server_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSettings {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_name() -> String {
    "raw_emails".to_string()
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            index_name: default_index_name(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Chat webhook receiving a short formatted message.
    #[serde(default)]
    pub slack_webhook_url: SecretSource,
    /// Generic webhook receiving the JSON payload.
    #[serde(default)]
    pub webhook_url: SecretSource,
    /// Category labels that trigger a notification.
    #[serde(default = "default_trigger_categories")]
    pub categories: Vec<String>,
}

fn default_trigger_categories() -> Vec<String> {
    vec!["interested".to_string()]
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            slack_webhook_url: SecretSource::default(),
            webhook_url: SecretSource::default(),
            categories: default_trigger_categories(),
        }
    }
}

impl NotificationSettings {
    pub fn trigger_categories(&self) -> Vec<Category> {
        self.categories
            .iter()
            .map(|label| Category::parse_label(label))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_backlog_window")]
    pub backlog_window_hours: u32,
    #[serde(default = "default_message_pause")]
    pub message_pause_ms: u64,
    #[serde(default = "default_route_timeout")]
    pub route_timeout_secs: u64,
    /// IDLE is re-issued after this long; servers drop idlers after 30 minutes.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_reconnect_delay() -> u64 {
    10
}

fn default_backlog_window() -> u32 {
    24
}

fn default_message_pause() -> u64 {
    1000
}

fn default_route_timeout() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    1500
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
            backlog_window_hours: default_backlog_window(),
            message_pause_ms: default_message_pause(),
            route_timeout_secs: default_route_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl SessionSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn message_pause(&self) -> Duration {
        Duration::from_millis(self.message_pause_ms)
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_secs(self.route_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn backlog_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.backlog_window_hours))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySettings {
    /// Link the drafted replies must include verbatim.
    #[serde(default = "default_booking_link")]
    pub booking_link: String,
    /// Number of rules retrieved as prompt context.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_booking_link() -> String {
    "https://cal.com/example".to_string()
}

fn default_top_k() -> usize {
    3
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            booking_link: default_booking_link(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    /// SQLite file; `~/.mailroute/data/mailroute.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
