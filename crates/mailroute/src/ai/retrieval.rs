//! Rule embeddings and top-K similarity search.
//!
//! Rule sets are small, so search is a linear scan over every stored vector.

use log::debug;

use crate::db::{rule_repo, Database, DatabaseError};

/// A stored rule with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Cosine similarity of two vectors.
///
/// Vectors of different length are compared over their common prefix; a
/// zero vector has similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Persistent store of rule embeddings.
#[derive(Clone)]
pub struct RuleStore {
    db: Database,
}

impl RuleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a rule, or overwrites text and vector of an existing id.
    pub fn add_rule(&self, id: &str, text: &str, embedding: &[f32]) -> Result<(), DatabaseError> {
        rule_repo::upsert(&self.db, id, text, embedding)?;
        debug!("Stored rule '{}' ({} dims)", id, embedding.len());
        Ok(())
    }

    pub fn len(&self) -> Result<u64, DatabaseError> {
        rule_repo::count(&self.db)
    }

    pub fn is_empty(&self) -> Result<bool, DatabaseError> {
        Ok(self.len()? == 0)
    }

    /// The `k` rules most similar to `query`, best first.
    ///
    /// Equal scores keep storage order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RuleMatch>, DatabaseError> {
        let mut scored: Vec<RuleMatch> = rule_repo::list(&self.db)?
            .into_iter()
            .map(|row| RuleMatch {
                score: cosine_similarity(query, &row.embedding),
                id: row.id,
                text: row.text,
            })
            .collect();

        // Stable sort keeps insertion order among ties
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}
