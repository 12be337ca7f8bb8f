//! QueueJob: one outbound call waiting for (or done with) dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::milestone::Milestone;
use super::payload::JobPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }
}

/// Design:
/// - (visit_id, milestone) is unique; the store enforces it.
/// - All status changes go through the methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueJob {
    pub job_id: JobId,
    pub visit_id: String,
    pub milestone: Milestone,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueueJob {
    pub fn new(
        job_id: JobId,
        visit_id: impl Into<String>,
        milestone: Milestone,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            visit_id: visit_id.into(),
            milestone,
            payload,
            status: JobStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    /// Count a failed attempt; the job stays PENDING.
    pub fn record_failure(&mut self, error: String, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.updated_at = now;
    }

    /// Manual retry of a FAILED job.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.retry_count = 0;
        self.last_error = None;
        self.updated_at = now;
    }
}
