//! Durable per-account progress marker.

use log::{debug, info, warn};

use crate::db::{progress_repo, Database, DatabaseError};

use super::source::SeqNo;

/// Tracks the highest cursor fully processed for one account.
///
/// The marker only moves forward within one folder epoch (UIDVALIDITY). When
/// the server reports a new epoch every old cursor is meaningless, so the
/// marker restarts at zero and the index duplicate guard takes over.
pub struct ProgressTracker {
    db: Database,
    account_id: String,
    uid_validity: Option<u32>,
    last_seq: SeqNo,
}

impl ProgressTracker {
    /// Loads the stored marker for an account; zero when none is stored.
    pub fn load(db: Database, account_id: impl Into<String>) -> Result<Self, DatabaseError> {
        let account_id = account_id.into();
        let row = progress_repo::find(&db, &account_id)?;
        let (uid_validity, last_seq) = row
            .map(|r| (r.uid_validity, r.last_seq))
            .unwrap_or((None, 0));

        debug!(
            "Loaded progress for account '{}': lastSeq={} uidValidity={:?}",
            account_id, last_seq, uid_validity
        );

        Ok(Self {
            db,
            account_id,
            uid_validity,
            last_seq,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn last_seq(&self) -> SeqNo {
        self.last_seq
    }

    /// True when `seq` is at or below the marker and needs no work.
    pub fn is_covered(&self, seq: SeqNo) -> bool {
        seq <= self.last_seq
    }

    /// Aligns the tracker with the epoch reported by the opened folder.
    ///
    /// Returns `true` if the marker was reset.
    pub fn sync_epoch(&mut self, uid_validity: Option<u32>) -> Result<bool, DatabaseError> {
        if uid_validity.is_none() || uid_validity == self.uid_validity {
            return Ok(false);
        }

        let reset = match self.uid_validity {
            Some(previous) => {
                warn!(
                    "UIDVALIDITY changed for account '{}': {} -> {:?}. Resetting lastSeq {} to 0",
                    self.account_id, previous, uid_validity, self.last_seq
                );
                self.last_seq = 0;
                true
            }
            None => {
                info!(
                    "Account '{}' adopts UIDVALIDITY {:?} at lastSeq {}",
                    self.account_id, uid_validity, self.last_seq
                );
                false
            }
        };

        self.uid_validity = uid_validity;
        self.last_seq = progress_repo::upsert(
            &self.db,
            &self.account_id,
            self.uid_validity,
            self.last_seq,
        )?;
        Ok(reset)
    }

    /// Persists `seq` as the new marker if it is ahead of the current one.
    ///
    /// Returns `true` if the marker moved.
    pub fn advance(&mut self, seq: SeqNo) -> Result<bool, DatabaseError> {
        if self.is_covered(seq) {
            return Ok(false);
        }

        self.last_seq =
            progress_repo::upsert(&self.db, &self.account_id, self.uid_validity, seq)?;
        debug!(
            "Advanced lastSeq for account '{}' to {}",
            self.account_id, self.last_seq
        );
        Ok(true)
    }
}
