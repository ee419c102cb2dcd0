//! OpenSearch / Elasticsearch REST implementation of [`IndexStore`].

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use crate::config::IndexSettings;
use crate::email::Email;

use super::{DocumentUpdate, EmailQuery, IndexError, IndexStore, QueryHit, QueryResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of error bodies kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub struct OpenSearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

impl OpenSearchIndex {
    pub fn new(settings: &IndexSettings) -> Result<Self, IndexError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            index: settings.index_name.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, path)
    }

    /// Creates the index with its field mappings if it does not exist yet.
    ///
    /// Returns `true` if the index was created.
    pub async fn ensure_index(&self) -> Result<bool, IndexError> {
        let index_url = format!("{}/{}", self.base_url, self.index);
        let exists = self.client.head(&index_url).send().await?;
        if exists.status().is_success() {
            debug!("Index '{}' already exists", self.index);
            return Ok(false);
        }
        if exists.status() != StatusCode::NOT_FOUND {
            return Err(status_error(exists).await);
        }

        let response = self
            .client
            .put(&index_url)
            .json(&index_mappings())
            .send()
            .await?;
        check(response).await?;
        info!("Created index '{}'", self.index);
        Ok(true)
    }
}

/// Field mappings: free text for search, keywords for exact filters.
pub fn index_mappings() -> Value {
    json!({
        "mappings": {
            "properties": {
                "from": { "type": "text" },
                "to": { "type": "text" },
                "subject": { "type": "text" },
                "body": { "type": "text" },
                "date": { "type": "date" },
                "folder": { "type": "keyword" },
                "accountId": { "type": "keyword" },
                "accountEmail": { "type": "keyword" },
                "category": { "type": "keyword" },
                "messageId": { "type": "keyword" }
            }
        }
    })
}

fn sanitize_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

async fn status_error(response: Response) -> IndexError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    IndexError::Status {
        status,
        body: sanitize_error_body(&body),
    }
}

async fn check(response: Response) -> Result<Value, IndexError> {
    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    Ok(response.json().await?)
}

/// Extracts `{total, hits}` from a `_search` response.
fn parse_search_response(body: &Value) -> Result<QueryResult, IndexError> {
    let hits = body
        .get("hits")
        .ok_or_else(|| IndexError::Decode("missing 'hits'".to_string()))?;

    // Older servers report a bare number, newer ones {"value": n}
    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(obj) => obj.get("value").and_then(Value::as_u64).unwrap_or(0),
        None => 0,
    };

    let hits = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|hit| QueryHit {
                    id: hit
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    source: hit.get("_source").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(QueryResult { total, hits })
}

#[async_trait]
impl IndexStore for OpenSearchIndex {
    async fn index_document(&self, email: &Email) -> Result<String, IndexError> {
        let response = self.client.post(self.url("_doc")).json(email).send().await?;
        let body = check(response).await?;
        let id = body
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| IndexError::Decode("missing '_id' in index response".to_string()))?;
        debug!("Indexed message {} as document {}", email.seqno, id);
        Ok(id.to_string())
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<(), IndexError> {
        let response = self
            .client
            .post(self.url(&format!("_update/{}", id)))
            .json(&json!({ "doc": update }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn query(&self, query: &EmailQuery) -> Result<QueryResult, IndexError> {
        let response = self
            .client
            .post(self.url("_search"))
            .json(&query.to_search_body())
            .send()
            .await?;
        let body = check(response).await?;
        parse_search_response(&body)
    }
}
