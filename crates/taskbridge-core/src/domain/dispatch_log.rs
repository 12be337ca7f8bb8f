//! Dispatch history: one entry per call to the authority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AttemptId, JobId};
use super::milestone::Milestone;

/// A single dispatch attempt of a job.
///
/// Records:
/// - what was sent (request)
/// - what came back (code, response body) or why nothing came back (error)
///
/// Written for every attempt, accepted or not, so an operator can explain
/// why a job ended up FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub attempt_id: AttemptId,
    pub job_id: JobId,
    pub visit_id: String,
    pub milestone: Milestone,
    pub endpoint: String,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub code: Option<u16>,
    pub error: Option<String>,
    pub accepted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
