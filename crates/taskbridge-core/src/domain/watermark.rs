//! Per-stream ingestion watermark.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::milestone::Milestone;

/// How far a stream has been ingested.
///
/// Cursors are local wall-clock timestamps composed from the source's date
/// and time-of-day columns; they are compared as-is, without any timezone
/// conversion.
///
/// Invariant: `pending_cursor`, when set, is never behind `committed_cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingWatermark {
    pub stream: Milestone,
    pub committed_cursor: NaiveDateTime,
    pub pending_cursor: Option<NaiveDateTime>,
    pub batch_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl PollingWatermark {
    pub fn new(stream: Milestone, initial_cursor: NaiveDateTime, now: DateTime<Utc>) -> Self {
        Self {
            stream,
            committed_cursor: initial_cursor,
            pending_cursor: None,
            batch_count: 0,
            updated_at: now,
        }
    }

    /// Where the next fetch starts: a pending cursor means a batch was
    /// interrupted after it had been processed, so resume from there.
    pub fn cursor(&self) -> NaiveDateTime {
        self.pending_cursor.unwrap_or(self.committed_cursor)
    }

    /// Speculatively advance past a processed batch.
    pub fn advance(&mut self, batch_max: NaiveDateTime, now: DateTime<Utc>) {
        let floor = self.cursor();
        self.pending_cursor = Some(batch_max.max(floor));
        self.batch_count += 1;
        self.updated_at = now;
    }

    pub fn commit(&mut self, now: DateTime<Utc>) {
        if let Some(pending) = self.pending_cursor.take() {
            self.committed_cursor = pending;
        }
        self.updated_at = now;
    }

    pub fn rollback(&mut self, now: DateTime<Utc>) {
        self.pending_cursor = None;
        self.updated_at = now;
    }
}
