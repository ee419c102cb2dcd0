//! Wires the fakes into a pipeline and account sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use mailroute::ai::LanguageModel;
use mailroute::classify::ClassificationService;
use mailroute::config::{
    AccountConfig, AuthSettings, AuthType, ClassifierSettings, SessionSettings,
};
use mailroute::db::Database;
use mailroute::email::{AccountSession, FolderRouter, MailConnector, ProgressTracker, ScanSummary};
use mailroute::index::IndexStore;
use mailroute::notify::{NotificationDispatcher, NotificationSink};
use mailroute::pipeline::MessagePipeline;
use mailroute::secrets::SecretSource;
use mailroute::Category;

use super::fakes::{FakeConnector, FakeMailbox, MemoryIndex, RecordingSink, INBOX};

pub const ACCOUNT_ID: &str = "work";

pub fn raw_message(message_id: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: Alice <alice@example.com>\r\n\
         To: me@example.com\r\n\
         Subject: {}\r\n\
         Message-ID: <{}>\r\n\
         Date: Wed, 01 May 2024 09:30:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {}\r\n",
        subject, message_id, body
    )
    .into_bytes()
}

pub fn test_account() -> AccountConfig {
    AccountConfig {
        id: ACCOUNT_ID.to_string(),
        username: "me@example.com".to_string(),
        host: "imap.example.com".to_string(),
        port: 993,
        use_tls: true,
        accept_invalid_certs: false,
        auth: AuthSettings {
            auth_type: AuthType::Password,
            password: SecretSource::inline("secret"),
            access_token: SecretSource::default(),
        },
        folder: INBOX.to_string(),
        labels: HashMap::new(),
        enabled: true,
    }
}

/// Classifier settings without jitter or spacing, so waits are backoff only.
pub fn quick_classifier() -> ClassifierSettings {
    ClassifierSettings {
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        min_interval_ms: 0,
        reservoir: 1000,
        ..ClassifierSettings::default()
    }
}

pub fn quick_session() -> SessionSettings {
    SessionSettings {
        message_pause_ms: 0,
        ..SessionSettings::default()
    }
}

pub struct Harness {
    pub mailbox: FakeMailbox,
    pub connector: Arc<FakeConnector>,
    pub index: Arc<MemoryIndex>,
    pub db: Database,
    pub account: AccountConfig,
    pub settings: SessionSettings,
    pub slack: RecordingSink,
    pub webhook: RecordingSink,
    pub pipeline: Arc<MessagePipeline>,
}

impl Harness {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::with_sinks(model, RecordingSink::new("slack"), RecordingSink::new("webhook"))
    }

    pub fn with_sinks(
        model: Arc<dyn LanguageModel>,
        slack: RecordingSink,
        webhook: RecordingSink,
    ) -> Self {
        let mailbox = FakeMailbox::new();
        let connector = Arc::new(FakeConnector::new(mailbox.clone()));
        let index = MemoryIndex::new();
        let db = Database::open_in_memory().expect("in-memory database");

        let classifier = Arc::new(ClassificationService::new(model, &quick_classifier()));
        let router = FolderRouter::new(
            connector.clone() as Arc<dyn MailConnector>,
            Duration::from_secs(60),
        );
        let sinks: Vec<Box<dyn NotificationSink>> =
            vec![Box::new(slack.clone()), Box::new(webhook.clone())];
        let notifier = Arc::new(NotificationDispatcher::new(sinks, vec![Category::Interested]));
        let pipeline = Arc::new(MessagePipeline::new(
            index.clone() as Arc<dyn IndexStore>,
            classifier,
            router,
            notifier,
        ));

        Self {
            mailbox,
            connector,
            index,
            db,
            account: test_account(),
            settings: quick_session(),
            slack,
            webhook,
            pipeline,
        }
    }

    /// A session loaded from the harness database.
    pub fn session(&self) -> AccountSession {
        let tracker =
            ProgressTracker::load(self.db.clone(), ACCOUNT_ID).expect("progress loads");
        AccountSession::new(
            self.account.clone(),
            self.connector.clone() as Arc<dyn MailConnector>,
            self.index.clone() as Arc<dyn IndexStore>,
            self.pipeline.clone(),
            tracker,
            self.settings.clone(),
        )
    }

    /// Connects, opens the inbox and runs one scan.
    pub async fn scan_once(&self, session: &mut AccountSession) -> ScanSummary {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut mail = self
            .connector
            .connect(&self.account)
            .await
            .expect("fake connect");
        mail.open_folder(INBOX).await.expect("inbox opens");
        let summary = session
            .scan(mail.as_mut(), &shutdown_rx)
            .await
            .expect("scan succeeds");
        mail.logout().await.expect("logout");
        summary
    }

    pub fn stored_last_seq(&self) -> u32 {
        mailroute::db::progress_repo::find(&self.db, ACCOUNT_ID)
            .expect("progress query")
            .map(|row| row.last_seq)
            .unwrap_or(0)
    }
}
