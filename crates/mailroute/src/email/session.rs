//! Long-lived watching session for one account.
//!
//! The session cycles `Disconnected -> Connecting -> Connected`. On every
//! connect it scans the backlog window, then waits for new mail, scanning
//! whenever the folder grows or a manual scan is requested. Any connection
//! error drops back to `Disconnected` and reconnects after a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{AccountConfig, SessionSettings};
use crate::index::{is_duplicate, IndexStore};
use crate::pipeline::MessagePipeline;

use super::error::{EmailError, Result};
use super::source::{MailConnector, MailEvent, MailSession, SeqNo};
use super::tracker::ProgressTracker;

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Shut down; the session will not reconnect.
    Stopped,
}

/// Snapshot published whenever the session changes state or advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub account_id: String,
    pub state: ConnectionState,
    pub last_seq: SeqNo,
    pub last_error: Option<String>,
    pub reconnects: u32,
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Counters for one pass over the candidate list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub candidates: usize,
    /// At or below the progress marker.
    pub already_seen: usize,
    /// Already present in the index.
    pub duplicates: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct AccountSession {
    account: AccountConfig,
    connector: Arc<dyn MailConnector>,
    index: Arc<dyn IndexStore>,
    pipeline: Arc<MessagePipeline>,
    tracker: ProgressTracker,
    settings: SessionSettings,
    status: watch::Sender<SessionStatus>,
}

impl AccountSession {
    pub fn new(
        account: AccountConfig,
        connector: Arc<dyn MailConnector>,
        index: Arc<dyn IndexStore>,
        pipeline: Arc<MessagePipeline>,
        tracker: ProgressTracker,
        settings: SessionSettings,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            account_id: account.id.clone(),
            state: ConnectionState::Disconnected,
            last_seq: tracker.last_seq(),
            last_error: None,
            reconnects: 0,
        });
        Self {
            account,
            connector,
            index,
            pipeline,
            tracker,
            settings,
            status,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account.id
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Runs until `shutdown` turns true or its sender goes away.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut trigger: broadcast::Receiver<()>,
    ) {
        let span = info_span!("session", account = %self.account.id);
        async {
            info!("Starting session");
            let mut attempts = 0u32;

            loop {
                if *shutdown.borrow() {
                    break;
                }

                self.set_state(ConnectionState::Connecting);
                if attempts > 0 {
                    self.status.send_modify(|s| s.reconnects += 1);
                }
                attempts += 1;

                let connected = tokio::select! {
                    result = self.connector.connect(&self.account) => result,
                    _ = shutdown.changed() => break,
                };

                match connected {
                    Ok(mut session) => {
                        self.set_state(ConnectionState::Connected);
                        let outcome = self
                            .serve(session.as_mut(), &mut shutdown, &mut trigger)
                            .await;

                        match timeout(LOGOUT_TIMEOUT, session.logout()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => debug!("Logout failed: {}", e),
                            Err(_) => debug!("Logout timed out"),
                        }

                        match outcome {
                            Ok(()) => break,
                            Err(e) => {
                                warn!("Connection lost: {}", e);
                                self.record_error(&e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to connect: {}", e);
                        self.record_error(&e);
                    }
                }

                self.set_state(ConnectionState::Disconnected);
                let delay = self.settings.reconnect_delay();
                info!("Reconnecting in {:?}", delay);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }

            self.set_state(ConnectionState::Stopped);
            info!("Session stopped");
        }
        .instrument(span)
        .await
    }

    /// Works one connection until shutdown (`Ok`) or a connection error.
    async fn serve(
        &mut self,
        session: &mut dyn MailSession,
        shutdown: &mut watch::Receiver<bool>,
        trigger: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let folder = session.open_folder(&self.account.folder).await?;
        debug!(exists = folder.exists, uid_validity = ?folder.uid_validity, "Opened folder");
        if let Err(e) = self.tracker.sync_epoch(folder.uid_validity) {
            error!("Failed to persist folder epoch: {}", e);
        }
        self.publish_progress();

        let summary = self.scan(session, shutdown).await?;
        info!(
            candidates = summary.candidates,
            processed = summary.processed,
            failed = summary.failed,
            "Backlog scan finished"
        );

        let idle_timeout = self.settings.idle_timeout();
        let mut triggers_open = true;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                received = trigger.recv(), if triggers_open => match received {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        info!("Manual scan requested");
                        self.scan(session, shutdown).await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => triggers_open = false,
                },
                event = session.next_event(idle_timeout) => match event? {
                    MailEvent::NewMail { count } if count > 0 => {
                        info!(count, "New mail");
                        self.scan(session, shutdown).await?;
                    }
                    MailEvent::NewMail { count } => {
                        debug!(count, "No arrivals behind the new-mail signal");
                    }
                    MailEvent::KeepAlive => debug!("Idle keep-alive"),
                    MailEvent::Closed => {
                        return Err(EmailError::ConnectionClosed(
                            "server ended the session".to_string(),
                        ));
                    }
                },
            }
        }
    }

    /// Processes every unseen, unindexed message in the backlog window.
    ///
    /// Per-message failures are logged and counted; only connection errors
    /// abort the scan.
    pub async fn scan(
        &mut self,
        session: &mut dyn MailSession,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ScanSummary> {
        let since = Utc::now() - self.settings.backlog_window();
        let mut candidates = session.search_since(since).await?;
        candidates.sort_unstable();
        candidates.dedup();

        let mut summary = ScanSummary {
            candidates: candidates.len(),
            ..Default::default()
        };
        debug!(candidates = summary.candidates, since = %since, "Scanning");

        for seq in candidates {
            if *shutdown.borrow() {
                debug!("Scan interrupted by shutdown");
                break;
            }

            if self.tracker.is_covered(seq) {
                summary.already_seen += 1;
                continue;
            }

            let message_id = match session.fetch_message_id(seq).await {
                Ok(id) => id,
                Err(e) if e.is_connection_error() => return Err(e),
                Err(e) => {
                    warn!(seq, "Failed to fetch message id: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            if is_duplicate(self.index.as_ref(), &self.account.id, message_id.as_deref()).await {
                debug!(seq, message_id = ?message_id, "Already indexed");
                summary.duplicates += 1;
                continue;
            }

            let raw = match session.fetch(seq).await {
                Ok(raw) => raw,
                Err(e) if e.is_connection_error() => return Err(e),
                Err(e) => {
                    warn!(seq, "Failed to fetch message: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            match self.pipeline.process(&self.account, seq, &raw).await {
                Ok(done) => {
                    summary.processed += 1;
                    debug!(seq, category = %done.category, "Message done");
                    if let Err(e) = self.tracker.advance(seq) {
                        error!(seq, "Failed to persist progress: {}", e);
                    }
                    self.publish_progress();
                }
                Err(e) => {
                    if e.is_indexed() {
                        warn!(
                            seq,
                            stage = ?e.stage(),
                            "Message indexed but left unfinished: {}",
                            e
                        );
                    } else {
                        warn!(seq, stage = ?e.stage(), "Message failed, retried next scan: {}", e);
                    }
                    summary.failed += 1;
                }
            }

            sleep(self.settings.message_pause()).await;
        }

        Ok(summary)
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| {
            s.state = state;
            if state == ConnectionState::Connected {
                s.last_error = None;
            }
        });
    }

    fn publish_progress(&self) {
        let last_seq = self.tracker.last_seq();
        self.status.send_if_modified(|s| {
            let changed = s.last_seq != last_seq;
            s.last_seq = last_seq;
            changed
        });
    }

    fn record_error(&self, e: &EmailError) {
        let message = e.to_string();
        self.status.send_modify(|s| s.last_error = Some(message));
    }
}
