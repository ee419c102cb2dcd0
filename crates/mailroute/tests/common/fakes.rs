//! In-memory stand-ins for every external service.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use mailroute::ai::{LanguageModel, ModelError};
use mailroute::config::AccountConfig;
use mailroute::email::{
    EmailError, FolderInfo, FolderStatus, MailConnector, MailEvent, MailSession, SeqNo,
};
use mailroute::index::{DocumentUpdate, EmailQuery, IndexError, IndexStore, QueryHit, QueryResult};
use mailroute::notify::{NotificationPayload, NotificationSink, NotifyError};
use mailroute::Email;

type EmailResult<T> = Result<T, EmailError>;

pub const INBOX: &str = "INBOX";

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: SeqNo,
    pub message_id: Option<String>,
    pub raw: Vec<u8>,
    pub received: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MailboxState {
    pub folders: BTreeMap<String, Vec<StoredMessage>>,
    pub delimiter: String,
    pub uid_validity: u32,
    pub next_uid: SeqNo,
    /// Connection attempts that fail before one succeeds.
    pub connect_failures: u32,
    /// Another client creates the folder just before we do.
    pub race_on_create: bool,
    pub events: VecDeque<MailEvent>,
    pub connects: u32,
    pub logouts: u32,
    pub creates: u32,
    pub id_fetches: u32,
    pub body_fetches: u32,
}

/// A shared mailbox served to every fake connection.
#[derive(Clone)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
    new_mail: Arc<Notify>,
}

impl Default for FakeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMailbox {
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(INBOX.to_string(), Vec::new());
        Self {
            state: Arc::new(Mutex::new(MailboxState {
                folders,
                delimiter: ".".to_string(),
                uid_validity: 1,
                next_uid: 1,
                connect_failures: 0,
                race_on_create: false,
                events: VecDeque::new(),
                connects: 0,
                logouts: 0,
                creates: 0,
                id_fetches: 0,
                body_fetches: 0,
            })),
            new_mail: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }

    /// Delivers a message into the inbox under the next free uid.
    pub fn deliver(&self, message_id: &str, subject: &str, body: &str) -> SeqNo {
        let uid = self.state().next_uid;
        self.deliver_with_uid(uid, message_id, subject, body)
    }

    pub fn deliver_with_uid(
        &self,
        uid: SeqNo,
        message_id: &str,
        subject: &str,
        body: &str,
    ) -> SeqNo {
        {
            let mut state = self.state();
            state.next_uid = state.next_uid.max(uid + 1);
            state
                .folders
                .entry(INBOX.to_string())
                .or_default()
                .push(StoredMessage {
                    uid,
                    message_id: Some(message_id.to_string()),
                    raw: super::raw_message(message_id, subject, body),
                    received: Utc::now(),
                });
        }
        self.new_mail.notify_one();
        uid
    }

    /// Adds a message without waking idle sessions.
    pub fn deliver_quietly(&self, message_id: &str, subject: &str, body: &str) -> SeqNo {
        let mut state = self.state();
        let uid = state.next_uid;
        state.next_uid += 1;
        state
            .folders
            .entry(INBOX.to_string())
            .or_default()
            .push(StoredMessage {
                uid,
                message_id: Some(message_id.to_string()),
                raw: super::raw_message(message_id, subject, body),
                received: Utc::now(),
            });
        uid
    }

    pub fn set_uid_validity(&self, uid_validity: u32) {
        self.state().uid_validity = uid_validity;
    }

    pub fn add_folder(&self, name: &str) {
        self.state().folders.entry(name.to_string()).or_default();
    }

    pub fn has_folder(&self, name: &str) -> bool {
        self.state().folders.contains_key(name)
    }

    pub fn uids_in(&self, folder: &str) -> Vec<SeqNo> {
        self.state()
            .folders
            .get(folder)
            .map(|messages| messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    pub fn push_event(&self, event: MailEvent) {
        self.state().events.push_back(event);
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.state().connect_failures = count;
    }

    pub fn race_on_create(&self, race: bool) {
        self.state().race_on_create = race;
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    pub fn logouts(&self) -> u32 {
        self.state().logouts
    }

    /// Removes a message from the inbox as another client would, without
    /// waking idle sessions.
    pub fn expunge_quietly(&self, uid: SeqNo) {
        if let Some(messages) = self.state().folders.get_mut(INBOX) {
            messages.retain(|m| m.uid != uid);
        }
    }

    pub fn fetches(&self) -> (u32, u32) {
        let state = self.state();
        (state.id_fetches, state.body_fetches)
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    pub mailbox: FakeMailbox,
}

impl FakeConnector {
    pub fn new(mailbox: FakeMailbox) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl MailConnector for FakeConnector {
    async fn connect(&self, _account: &AccountConfig) -> EmailResult<Box<dyn MailSession>> {
        let mut state = self.mailbox.state();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(EmailError::ConnectionFailed("connection refused".to_string()));
        }
        Ok(Box::new(FakeSession {
            mailbox: self.mailbox.clone(),
            selected: None,
            known: None,
        }))
    }
}

pub struct FakeSession {
    mailbox: FakeMailbox,
    selected: Option<String>,
    known: Option<FolderStatus>,
}

impl FakeSession {
    fn selected(&self) -> EmailResult<String> {
        self.selected
            .clone()
            .ok_or_else(|| EmailError::ProtocolError("no folder selected".to_string()))
    }

    fn status_of(&self, folder: &str) -> EmailResult<FolderStatus> {
        let state = self.mailbox.state();
        let messages = state
            .folders
            .get(folder)
            .ok_or_else(|| EmailError::FolderNotFound(folder.to_string()))?;
        Ok(FolderStatus {
            exists: messages.len() as u32,
            uid_validity: Some(state.uid_validity),
            uid_next: Some(state.next_uid),
        })
    }

    /// Arrivals since the last look, the way the IMAP client counts them.
    fn refresh_arrivals(&mut self) -> EmailResult<i64> {
        let status = self.status_of(&self.selected()?)?;
        let arrivals = match &self.known {
            Some(known) => status.arrivals_since(known),
            None => i64::from(status.exists),
        };
        self.known = Some(status);
        Ok(arrivals)
    }

    fn take_message(&self, seq: SeqNo, keep: bool) -> EmailResult<StoredMessage> {
        let folder = self.selected()?;
        let mut state = self.mailbox.state();
        let messages = state
            .folders
            .get_mut(&folder)
            .ok_or_else(|| EmailError::FolderNotFound(folder.clone()))?;
        let position = messages
            .iter()
            .position(|m| m.uid == seq)
            .ok_or(EmailError::MessageNotFound(seq))?;
        if keep {
            Ok(messages[position].clone())
        } else {
            Ok(messages.remove(position))
        }
    }

    fn put_message(&self, folder: &str, message: StoredMessage) -> EmailResult<()> {
        let mut state = self.mailbox.state();
        let target = state
            .folders
            .get_mut(folder)
            .ok_or_else(|| EmailError::FolderNotFound(folder.to_string()))?;
        target.push(message);
        Ok(())
    }
}

#[async_trait]
impl MailSession for FakeSession {
    async fn open_folder(&mut self, folder: &str) -> EmailResult<FolderStatus> {
        let status = self.status_of(folder)?;
        self.selected = Some(folder.to_string());
        self.known = Some(status);
        Ok(status)
    }

    async fn search_since(&mut self, since: DateTime<Utc>) -> EmailResult<Vec<SeqNo>> {
        let folder = self.selected()?;
        let state = self.mailbox.state();
        Ok(state
            .folders
            .get(&folder)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.received >= since)
                    .map(|m| m.uid)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_message_id(&mut self, seq: SeqNo) -> EmailResult<Option<String>> {
        let message = self.take_message(seq, true)?;
        self.mailbox.state().id_fetches += 1;
        Ok(message.message_id)
    }

    async fn fetch(&mut self, seq: SeqNo) -> EmailResult<Vec<u8>> {
        let message = self.take_message(seq, true)?;
        self.mailbox.state().body_fetches += 1;
        Ok(message.raw)
    }

    async fn list_folders(&mut self) -> EmailResult<Vec<FolderInfo>> {
        let state = self.mailbox.state();
        Ok(state
            .folders
            .keys()
            .map(|name| FolderInfo {
                name: name.clone(),
                delimiter: Some(state.delimiter.clone()),
            })
            .collect())
    }

    async fn create_folder(&mut self, name: &str) -> EmailResult<()> {
        let mut state = self.mailbox.state();
        state.creates += 1;
        if state.folders.contains_key(name) {
            return Err(EmailError::FolderExists(name.to_string()));
        }
        state.folders.insert(name.to_string(), Vec::new());
        if state.race_on_create {
            return Err(EmailError::FolderExists(name.to_string()));
        }
        Ok(())
    }

    async fn move_message(&mut self, seq: SeqNo, folder: &str) -> EmailResult<()> {
        if !self.mailbox.has_folder(folder) {
            return Err(EmailError::FolderNotFound(folder.to_string()));
        }
        let message = self.take_message(seq, false)?;
        self.put_message(folder, message)
    }

    async fn copy_message(&mut self, seq: SeqNo, folder: &str) -> EmailResult<()> {
        let message = self.take_message(seq, true)?;
        self.put_message(folder, message)
    }

    async fn next_event(&mut self, max_wait: Duration) -> EmailResult<MailEvent> {
        let scripted = self.mailbox.state().events.pop_front();
        if let Some(event) = scripted {
            return Ok(event);
        }
        let arrivals = self.refresh_arrivals()?;
        if arrivals > 0 {
            return Ok(MailEvent::NewMail { count: arrivals });
        }
        let new_mail = self.mailbox.new_mail.clone();
        tokio::select! {
            _ = new_mail.notified() => Ok(MailEvent::NewMail {
                count: self.refresh_arrivals()?,
            }),
            _ = tokio::time::sleep(max_wait) => Ok(MailEvent::KeepAlive),
        }
    }

    async fn logout(&mut self) -> EmailResult<()> {
        self.mailbox.state().logouts += 1;
        self.selected = None;
        Ok(())
    }
}

/// Index store keeping documents as JSON in memory.
#[derive(Default)]
pub struct MemoryIndex {
    docs: Mutex<Vec<(String, Value)>>,
    fail_queries: AtomicBool,
    queries: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts a document as if another process had indexed it.
    pub fn seed(&self, document: Value) -> String {
        let mut docs = self.docs.lock().unwrap();
        let id = format!("doc-{}", docs.len() + 1);
        docs.push((id.clone(), document));
        id
    }

    pub fn documents(&self) -> Vec<Value> {
        self.docs.lock().unwrap().iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn document(&self, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap()
            .iter()
            .find(|(doc_id, _)| doc_id == id)
            .map(|(_, d)| d.clone())
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

fn field_matches(document: &Value, field: &str, expected: Option<&str>) -> bool {
    match expected {
        Some(expected) => document[field].as_str() == Some(expected),
        None => true,
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    async fn index_document(&self, email: &Email) -> Result<String, IndexError> {
        let document =
            serde_json::to_value(email).map_err(|e| IndexError::Decode(e.to_string()))?;
        Ok(self.seed(document))
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<(), IndexError> {
        let fields = serde_json::to_value(update).map_err(|e| IndexError::Decode(e.to_string()))?;
        let mut docs = self.docs.lock().unwrap();
        let (_, document) = docs
            .iter_mut()
            .find(|(doc_id, _)| doc_id == id)
            .ok_or_else(|| IndexError::Status {
                status: 404,
                body: format!("document {} not found", id),
            })?;
        if let (Some(target), Some(fields)) = (document.as_object_mut(), fields.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn query(&self, query: &EmailQuery) -> Result<QueryResult, IndexError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(IndexError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        let category = query.category.map(|c| c.label());
        let hits: Vec<QueryHit> = self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, doc)| {
                field_matches(doc, "accountId", query.account_id.as_deref())
                    && field_matches(doc, "messageId", query.message_id.as_deref())
                    && field_matches(doc, "category", category.as_deref())
                    && field_matches(doc, "folder", query.folder.as_deref())
            })
            .map(|(id, doc)| QueryHit {
                id: id.clone(),
                source: doc.clone(),
            })
            .collect();

        Ok(QueryResult {
            total: hits.len() as u64,
            hits: hits.into_iter().skip(query.from).take(query.size).collect(),
        })
    }
}

/// Language model answering from a script, then from a fallback.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn always(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(answer.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn script(replies: Vec<Result<String, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn throttled(retry_after: Option<Duration>) -> Result<String, ModelError> {
    Err(ModelError::Throttled {
        message: "429 RESOURCE_EXHAUSTED".to_string(),
        retry_after,
    })
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        self.fallback.clone().ok_or(ModelError::EmptyResponse)
    }
}

/// Sink recording every payload it receives.
#[derive(Clone)]
pub struct RecordingSink {
    name: String,
    fail: bool,
    pub received: Arc<Mutex<Vec<NotificationPayload>>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(payload.clone());
        if self.fail {
            return Err(NotifyError::Status {
                status: 500,
                body: "sink down".to_string(),
            });
        }
        Ok(())
    }
}
