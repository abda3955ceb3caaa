use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch::ProgressPatch;

/// A patch waiting in the local queue, stamped with the time it was accepted.
///
/// Persisted as `{"t": <epoch-ms>, "patch": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(rename = "t")]
    timestamp: i64,
    patch: ProgressPatch,
}

impl QueueEntry {
    #[must_use]
    pub fn new(queued_at: DateTime<Utc>, patch: ProgressPatch) -> Self {
        Self {
            timestamp: queued_at.timestamp_millis(),
            patch,
        }
    }

    /// Epoch milliseconds at which the entry was queued.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }

    #[must_use]
    pub fn patch(&self) -> &ProgressPatch {
        &self.patch
    }

    #[must_use]
    pub fn into_patch(self) -> ProgressPatch {
        self.patch
    }
}

/// Fold queued entries, oldest first, into the single patch to flush.
#[must_use]
pub fn consolidate(entries: &[QueueEntry]) -> ProgressPatch {
    ProgressPatch::coalesce(entries.iter().map(QueueEntry::patch))
}
