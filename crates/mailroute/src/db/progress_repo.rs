//! Account progress repository: the durable `accountId -> lastSeq` mapping.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// A raw progress row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    pub account_id: String,
    pub uid_validity: Option<u32>,
    pub last_seq: u32,
    pub updated_at: String,
}

/// Finds the stored progress for an account.
pub fn find(db: &Database, account_id: &str) -> Result<Option<ProgressRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT account_id, uid_validity, last_seq, updated_at
                 FROM account_progress WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(ProgressRow {
                        account_id: row.get(0)?,
                        uid_validity: row.get(1)?,
                        last_seq: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Writes the marker for an account and returns the value actually stored.
///
/// Within one `uid_validity` epoch the stored marker never decreases: a lower
/// `last_seq` leaves the row untouched. A different epoch replaces the row.
pub fn upsert(
    db: &Database,
    account_id: &str,
    uid_validity: Option<u32>,
    last_seq: u32,
) -> Result<u32, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO account_progress (account_id, uid_validity, last_seq, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id) DO UPDATE SET
                last_seq = CASE
                    WHEN account_progress.uid_validity IS excluded.uid_validity
                    THEN MAX(account_progress.last_seq, excluded.last_seq)
                    ELSE excluded.last_seq
                END,
                uid_validity = excluded.uid_validity,
                updated_at = excluded.updated_at",
            params![account_id, uid_validity, last_seq, now],
        )?;

        let stored: u32 = conn.query_row(
            "SELECT last_seq FROM account_progress WHERE account_id = ?1",
            params![account_id],
            |r| r.get(0),
        )?;
        Ok(stored)
    })
}
