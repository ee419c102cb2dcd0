//! Runs one fetched message through normalize, index, classify, route and notify.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::classify::{Category, ClassificationService};
use crate::config::AccountConfig;
use crate::email::{Email, EmailParser, FolderRouter, SeqNo};
use crate::index::{DocumentUpdate, IndexStore};
use crate::notify::{DispatchReport, NotificationDispatcher};

use super::error::PipelineError;

/// Result of a message that went through every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub document_id: String,
    pub category: Category,
    /// Folder the message now lives in, as named by the server.
    pub folder: String,
    pub notifications: DispatchReport,
}

/// Normalize, index, classify, update, route, notify.
///
/// Classification and notification never fail a message; every other step
/// does, and the error names it.
pub struct MessagePipeline {
    parser: EmailParser,
    index: Arc<dyn IndexStore>,
    classifier: Arc<ClassificationService>,
    router: FolderRouter,
    notifier: Arc<NotificationDispatcher>,
}

impl MessagePipeline {
    pub fn new(
        index: Arc<dyn IndexStore>,
        classifier: Arc<ClassificationService>,
        router: FolderRouter,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            parser: EmailParser::new(),
            index,
            classifier,
            router,
            notifier,
        }
    }

    pub async fn process(
        &self,
        account: &AccountConfig,
        seq: SeqNo,
        raw: &[u8],
    ) -> Result<ProcessedMessage, PipelineError> {
        let span = info_span!("pipeline", account = %account.id, seq);
        self.run(account, seq, raw).instrument(span).await
    }

    async fn run(
        &self,
        account: &AccountConfig,
        seq: SeqNo,
        raw: &[u8],
    ) -> Result<ProcessedMessage, PipelineError> {
        // Step 1: Normalize
        let mut email = self
            .parser
            .normalize(raw, seq, account, Utc::now())
            .map_err(PipelineError::Normalize)?;
        debug!(subject = %email.subject, "Normalized message");

        // Step 2: Index unprocessed
        let document_id = self
            .index
            .index_document(&email)
            .instrument(info_span!("index"))
            .await
            .map_err(PipelineError::Index)?;

        // Step 3: Classify
        let category = self
            .classifier
            .classify(&email.subject, &email.body)
            .instrument(info_span!("classify"))
            .await;
        email.mark_classified(category, Utc::now());

        // Step 4: Record the outcome
        let destination = account.folder_for(category);
        self.step_update(&email, &document_id, &destination).await?;

        // Step 5: Route
        let folder = self
            .router
            .move_to(account, &account.folder, seq, &destination)
            .instrument(info_span!("route", folder = %destination))
            .await
            .map_err(|source| PipelineError::Route {
                document_id: document_id.clone(),
                folder: destination.clone(),
                source,
            })?;

        // Step 6: Notify
        let notifications = self
            .notifier
            .dispatch(&email, category)
            .instrument(info_span!("notify"))
            .await;
        if notifications.failed > 0 {
            warn!(
                failed = notifications.failed,
                "Some notifications were not delivered"
            );
        }

        info!(%category, folder = %folder, document_id = %document_id, "Processed message");
        Ok(ProcessedMessage {
            document_id,
            category,
            folder,
            notifications,
        })
    }

    async fn step_update(
        &self,
        email: &Email,
        document_id: &str,
        destination: &str,
    ) -> Result<(), PipelineError> {
        let processed_at = email.processed_at.unwrap_or_else(Utc::now);
        let update =
            DocumentUpdate::classified(email.category, processed_at).with_folder(destination);
        self.index
            .update_document(document_id, &update)
            .instrument(info_span!("update"))
            .await
            .map_err(|source| PipelineError::Update {
                document_id: document_id.to_string(),
                source,
            })
    }
}
