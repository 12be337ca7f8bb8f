//! Decision model: what to do with a job after a rejected dispatch.
//!
//! The Decider is pure: given the job (with its failure already counted)
//! it returns the next action. Applying it (updating the job, the visit
//! progress) is the dispatch worker's job.

use super::job::QueueJob;

/// The next action for a job whose dispatch was not accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Leave the job PENDING; the next tick picks it up again.
    Retry { reason: String },

    /// Give up: job and progress entry become FAILED.
    MarkFailed { reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, job: &QueueJob) -> Decision;
}

/// Retry until `max_retries` failures have been counted.
///
/// No backoff: the dispatch interval is the only delay between attempts.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    max_retries: u32,
}

impl DefaultDecider {
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &QueueJob) -> Decision {
        if job.retry_count >= self.max_retries {
            Decision::MarkFailed {
                reason: format!(
                    "max retries reached: {}/{}",
                    job.retry_count, self.max_retries
                ),
            }
        } else {
            Decision::Retry {
                reason: format!("retry {}/{}", job.retry_count, self.max_retries),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobPayload, Milestone, MilestoneUpdatePayload};
    use chrono::Utc;
    use rstest::rstest;
    use ulid::Ulid;

    fn job_with_retries(retry_count: u32) -> QueueJob {
        let payload = JobPayload::MilestoneUpdate(MilestoneUpdatePayload {
            kodebooking: "V1".into(),
            taskid: 5,
            waktu: 0,
        });
        let mut job = QueueJob::new(
            JobId::from_ulid(Ulid::new()),
            "V1",
            Milestone::ServiceFinish,
            payload,
            Utc::now(),
        );
        job.retry_count = retry_count;
        job
    }

    #[rstest]
    #[case::first_failure(1, false)]
    #[case::fourth_failure(4, false)]
    #[case::fifth_failure(5, true)]
    #[case::beyond(7, true)]
    fn default_decider_gives_up_at_max(#[case] retries: u32, #[case] gives_up: bool) {
        let decision = DefaultDecider::default().decide(&job_with_retries(retries));
        assert_eq!(matches!(decision, Decision::MarkFailed { .. }), gives_up);
    }
}
