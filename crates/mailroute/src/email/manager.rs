//! Runs one [`AccountSession`] per enabled account.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{error, info};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::{Database, DatabaseError};
use crate::index::IndexStore;
use crate::pipeline::MessagePipeline;

use super::session::{AccountSession, SessionStatus};
use super::source::MailConnector;
use super::tracker::ProgressTracker;

const TRIGGER_CAPACITY: usize = 16;

pub struct SessionManager {
    sessions: Vec<AccountSession>,
    trigger: broadcast::Sender<()>,
}

impl SessionManager {
    /// Builds sessions for every enabled account, loading their progress.
    pub fn new(
        config: &Config,
        db: &Database,
        connector: Arc<dyn MailConnector>,
        index: Arc<dyn IndexStore>,
        pipeline: Arc<MessagePipeline>,
    ) -> Result<Self, DatabaseError> {
        let sessions = config
            .enabled_accounts()
            .map(|account| {
                let tracker = ProgressTracker::load(db.clone(), account.id.clone())?;
                Ok(AccountSession::new(
                    account.clone(),
                    Arc::clone(&connector),
                    Arc::clone(&index),
                    Arc::clone(&pipeline),
                    tracker,
                    config.session.clone(),
                ))
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        let (trigger, _) = broadcast::channel(TRIGGER_CAPACITY);
        Ok(Self { sessions, trigger })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Starts one task per session.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> RunningSessions {
        let mut statuses = HashMap::new();
        let mut handles = Vec::with_capacity(self.sessions.len());

        for session in self.sessions {
            let account_id = session.account_id().to_string();
            statuses.insert(account_id.clone(), session.subscribe());
            let trigger = self.trigger.subscribe();
            let shutdown = shutdown.clone();
            handles.push((
                account_id,
                tokio::spawn(async move { session.run(shutdown, trigger).await }),
            ));
        }

        info!("Started {} account session(s)", handles.len());
        RunningSessions {
            handles,
            statuses,
            trigger: self.trigger,
        }
    }
}

/// Handles to spawned sessions.
pub struct RunningSessions {
    handles: Vec<(String, JoinHandle<()>)>,
    statuses: HashMap<String, watch::Receiver<SessionStatus>>,
    trigger: broadcast::Sender<()>,
}

impl RunningSessions {
    pub fn status(&self, account_id: &str) -> Option<SessionStatus> {
        self.statuses.get(account_id).map(|rx| rx.borrow().clone())
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        let mut all: Vec<_> = self.statuses.values().map(|rx| rx.borrow().clone()).collect();
        all.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        all
    }

    pub fn subscribe(&self, account_id: &str) -> Option<watch::Receiver<SessionStatus>> {
        self.statuses.get(account_id).cloned()
    }

    /// Requests an immediate scan on every connected session.
    pub fn request_scan(&self) {
        // No receivers only means every session has stopped
        let _ = self.trigger.send(());
    }

    /// Waits for every session task to finish and returns their final status.
    pub async fn join(mut self) -> Vec<SessionStatus> {
        let handles = std::mem::take(&mut self.handles);
        let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (account_id, result) in ids.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!("Session task for account '{}' failed: {}", account_id, e);
            }
        }
        self.statuses()
    }
}
