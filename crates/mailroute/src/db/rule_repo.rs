//! Reply rule repository over the `reply_rules` table.

use chrono::Utc;
use rusqlite::params;

use super::{Database, DatabaseError};

/// A stored reply rule with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRow {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Inserts a rule or overwrites the text and vector of an existing one.
///
/// The row keeps its original `position`, so storage order is stable
/// across updates.
pub fn upsert(db: &Database, id: &str, text: &str, embedding: &[f32]) -> Result<(), DatabaseError> {
    let encoded = serde_json::to_string(embedding).map_err(|e| DatabaseError::CorruptRow {
        table: "reply_rules",
        reason: e.to_string(),
    })?;
    let now = Utc::now().to_rfc3339();

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO reply_rules (id, text, embedding, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
            params![id, text, encoded, now],
        )?;
        Ok(())
    })
}

/// Returns every rule in storage order.
pub fn list(db: &Database) -> Result<Vec<RuleRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id, text, embedding FROM reply_rules ORDER BY position ASC")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, text, embedding)| {
                let embedding: Vec<f32> =
                    serde_json::from_str(&embedding).map_err(|e| DatabaseError::CorruptRow {
                        table: "reply_rules",
                        reason: format!("rule '{}': {}", id, e),
                    })?;
                Ok(RuleRow {
                    id,
                    text,
                    embedding,
                })
            })
            .collect()
    })
}

/// Counts stored rules.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM reply_rules", [], |r| r.get(0))?;
        Ok(count)
    })
}
