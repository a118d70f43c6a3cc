use crate::common::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Serializable pagination progress of one scan.
///
/// `total_count` is optional only so that a snapshot written by a broken or
/// truncated sidecar can be detected; [`PersistentCursor::load_from`] rejects
/// it rather than restarting from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_skip: u64,
    pub last_batch_number: u64,
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl SyncCursor {
    /// Whether the scan this snapshot belongs to has visited every item.
    pub fn is_complete(&self) -> bool {
        matches!(self.total_count, Some(total) if self.last_skip >= total)
    }
}

/// Tracks pagination progress for a single bulk scan.
///
/// Holds no I/O; callers decide whether and where to persist
/// [`snapshot`](PersistentCursor::snapshot)s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentCursor {
    last_skip: u64,
    last_batch_number: u64,
    total_count: u64,
}

impl PersistentCursor {
    /// Fresh cursor for a scan whose total was just reported by the remote.
    pub fn new(total_count: u64) -> Self {
        Self {
            last_skip: 0,
            last_batch_number: 0,
            total_count,
        }
    }

    /// Resume from a previously persisted snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedState`] when the snapshot has no total count.
    pub fn load_from(snapshot: SyncCursor) -> EngineResult<Self> {
        let total_count = snapshot.total_count.ok_or_else(|| {
            EngineError::malformed(
                "cursor snapshot",
                format!(
                    "total count is missing (last_skip={}, last_batch_number={})",
                    snapshot.last_skip, snapshot.last_batch_number
                ),
            )
        })?;

        Ok(Self {
            last_skip: snapshot.last_skip,
            last_batch_number: snapshot.last_batch_number,
            total_count,
        })
    }

    /// Record a completed batch that covered `skip_delta` items.
    ///
    /// Neither the skip offset nor the batch number ever move backwards.
    pub fn advance(&mut self, skip_delta: u64, completed_batch_number: u64) {
        self.last_skip = self.last_skip.saturating_add(skip_delta);
        self.last_batch_number = self.last_batch_number.max(completed_batch_number);
    }

    pub fn snapshot(&self) -> SyncCursor {
        SyncCursor {
            last_skip: self.last_skip,
            last_batch_number: self.last_batch_number,
            total_count: Some(self.total_count),
        }
    }

    pub fn last_skip(&self) -> u64 {
        self.last_skip
    }

    pub fn last_batch_number(&self) -> u64 {
        self.last_batch_number
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn is_complete(&self) -> bool {
        self.last_skip >= self.total_count
    }
}
