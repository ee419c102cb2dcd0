//! Search index access.
//!
//! Messages are written twice: once unclassified right after normalization
//! and once with the classification outcome. The same store answers the
//! duplicate guard queries the session runs before processing a message.

pub mod opensearch;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::classify::Category;
use crate::email::Email;

pub use opensearch::OpenSearchIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected index response: {0}")]
    Decode(String),
}

/// Fields written when a message has been classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub category: Category,
    pub processed: bool,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl DocumentUpdate {
    pub fn classified(category: Category, at: DateTime<Utc>) -> Self {
        Self {
            category,
            processed: true,
            processed_at: at,
            folder: None,
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }
}

/// Filter, sort and pagination for a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailQuery {
    pub account_id: Option<String>,
    pub message_id: Option<String>,
    pub category: Option<Category>,
    pub folder: Option<String>,
    pub text: Option<String>,
    pub from: usize,
    pub size: usize,
    pub newest_first: bool,
}

impl EmailQuery {
    pub fn new() -> Self {
        Self {
            size: 100,
            newest_first: true,
            ..Self::default()
        }
    }

    /// Query used by the duplicate guard.
    pub fn duplicate_of(account_id: &str, message_id: &str) -> Self {
        Self {
            size: 1,
            newest_first: false,
            ..Self::default()
        }
        .account(account_id)
        .message_id(message_id)
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }

    /// Renders the query as an OpenSearch / Elasticsearch `_search` body.
    pub fn to_search_body(&self) -> Value {
        let mut must = Vec::new();

        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            must.push(json!({
                "query_string": {
                    "query": format!("*{}*", text),
                    "fields": ["from", "to", "subject", "body"],
                    "default_operator": "AND"
                }
            }));
        }

        let terms = [
            ("accountId", self.account_id.clone()),
            ("messageId", self.message_id.clone()),
            ("category", self.category.map(|c| c.label())),
            ("folder", self.folder.clone()),
        ];
        for (field, value) in terms {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                must.push(json!({ "term": { field: value } }));
            }
        }

        let query = if must.is_empty() {
            json!({ "match_all": {} })
        } else {
            json!({ "bool": { "must": must } })
        };

        let mut body = json!({
            "query": query,
            "from": self.from,
            "size": self.size,
            "track_total_hits": true
        });
        if self.newest_first {
            body["sort"] = json!([{ "date": { "order": "desc" } }]);
        }
        body
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub total: u64,
    pub hits: Vec<QueryHit>,
}

/// Document store holding normalized messages.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Inserts a document and returns its id.
    async fn index_document(&self, email: &Email) -> Result<String, IndexError>;

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<(), IndexError>;

    async fn query(&self, query: &EmailQuery) -> Result<QueryResult, IndexError>;
}

/// Whether `message_id` has already been indexed for this account.
///
/// Query failures count as "not a duplicate". Without a message id only the
/// progress cursor guards against reprocessing.
pub async fn is_duplicate(
    store: &dyn IndexStore,
    account_id: &str,
    message_id: Option<&str>,
) -> bool {
    let Some(message_id) = message_id else {
        return false;
    };

    match store
        .query(&EmailQuery::duplicate_of(account_id, message_id))
        .await
    {
        Ok(result) => result.total > 0,
        Err(e) => {
            log::warn!(
                "Duplicate check failed for account '{}' message '{}': {}",
                account_id,
                message_id,
                e
            );
            false
        }
    }
}
