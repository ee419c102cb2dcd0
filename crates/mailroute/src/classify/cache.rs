//! Content-addressed cache of classification results.

use std::time::Duration;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

use super::Category;

const MAX_ENTRIES: u64 = 10_000;

/// Hex SHA-256 of the classification input.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Maps content hashes to categories for a fixed TTL.
///
/// Expired entries are never returned and are dropped when read.
#[derive(Clone)]
pub struct ClassificationCache {
    entries: Cache<String, Category>,
}

impl ClassificationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, text: &str) -> Option<Category> {
        self.entries.get(&content_hash(text))
    }

    pub fn insert(&self, text: &str, category: Category) {
        self.entries.insert(content_hash(text), category);
    }

    /// Number of live entries, after pending evictions have run.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
