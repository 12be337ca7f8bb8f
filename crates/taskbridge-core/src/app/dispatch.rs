//! Dispatch Worker - 保険者への送信
//!
//! # フロー（1 回の呼び出しで 1 ジョブ）
//! 1. 最も古い PENDING ジョブを取る
//! 2. マイルストーンに応じたエンドポイントへ送る
//! 3. 結果に関係なく送信ログを残す
//! 4. 200/208 → ジョブ SENT、progress も SENT
//! 5. それ以外 → retry_count を増やし、Decider が上限と判断したら FAILED
//!
//! 同時送信はしない。スループットより保険者側のレート制限を優先する。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::{
    Decider, Decision, DispatchAttempt, JobId, JobPayload, JobStatus, ProgressChange,
    ProgressOutcome, QueueJob, SyncError,
};
use crate::ports::{
    AuthorityApi, AuthorityError, AuthorityResponse, Clock, DispatchLogStore, IdGenerator,
    JobStore, MILESTONE_UPDATE_ENDPOINT, REGISTRATION_ENDPOINT, StoreError, VisitStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// PENDING ジョブなし
    Idle,
    Sent { job_id: JobId },
    Retrying { job_id: JobId, retry_count: u32 },
    Failed { job_id: JobId },
}

pub struct DispatchWorker {
    visits: Arc<dyn VisitStore>,
    jobs: Arc<dyn JobStore>,
    dispatch_log: Arc<dyn DispatchLogStore>,
    authority: Arc<dyn AuthorityApi>,
    decider: Arc<dyn Decider>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl DispatchWorker {
    pub fn new(
        visits: Arc<dyn VisitStore>,
        jobs: Arc<dyn JobStore>,
        dispatch_log: Arc<dyn DispatchLogStore>,
        authority: Arc<dyn AuthorityApi>,
        decider: Arc<dyn Decider>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            visits,
            jobs,
            dispatch_log,
            authority,
            decider,
            ids,
            clock,
        }
    }

    pub async fn process_next(&self) -> Result<DispatchOutcome, SyncError> {
        let Some(job) = self.jobs.oldest_pending_job().await? else {
            return Ok(DispatchOutcome::Idle);
        };

        let started_at = self.clock.now();
        let (endpoint, result) = self.submit(&job.payload).await;
        let accepted = result.as_ref().is_ok_and(AuthorityResponse::is_accepted);

        let attempt = DispatchAttempt {
            attempt_id: self.ids.generate_attempt_id(),
            job_id: job.job_id,
            visit_id: job.visit_id.clone(),
            milestone: job.milestone,
            endpoint: endpoint.to_string(),
            request: job.payload.body(),
            response: result.as_ref().ok().map(|r| r.body.clone()),
            code: result.as_ref().ok().map(|r| r.code),
            error: result.as_ref().err().map(ToString::to_string),
            accepted,
            started_at,
            completed_at: self.clock.now(),
        };
        self.dispatch_log.append_attempt(attempt).await?;

        if accepted {
            self.on_accepted(job).await
        } else {
            let reason = match &result {
                Ok(response) => format!("code {}: {}", response.code, response.message),
                Err(e) => e.to_string(),
            };
            self.on_rejected(job, reason).await
        }
    }

    async fn submit(
        &self,
        payload: &JobPayload,
    ) -> (&'static str, Result<AuthorityResponse, AuthorityError>) {
        match payload {
            JobPayload::Registration(p) => (
                REGISTRATION_ENDPOINT,
                self.authority.submit_registration(p).await,
            ),
            JobPayload::MilestoneUpdate(p) => (
                MILESTONE_UPDATE_ENDPOINT,
                self.authority.submit_milestone_update(p).await,
            ),
        }
    }

    async fn on_accepted(&self, mut job: QueueJob) -> Result<DispatchOutcome, SyncError> {
        let now = self.clock.now();
        job.mark_sent(now);
        self.jobs.save_job(&job).await?;

        let change = ProgressChange::MarkSent {
            milestone: job.milestone,
            sent_at: now,
        };
        self.apply_to_visit(&job, change).await?;

        info!(visit_id = %job.visit_id, milestone = %job.milestone, job_id = %job.job_id, "dispatched");
        Ok(DispatchOutcome::Sent { job_id: job.job_id })
    }

    async fn on_rejected(
        &self,
        mut job: QueueJob,
        reason: String,
    ) -> Result<DispatchOutcome, SyncError> {
        let now = self.clock.now();
        job.record_failure(reason.clone(), now);

        match self.decider.decide(&job) {
            Decision::Retry { reason: why } => {
                self.jobs.save_job(&job).await?;
                warn!(
                    visit_id = %job.visit_id,
                    milestone = %job.milestone,
                    job_id = %job.job_id,
                    error = %reason,
                    "dispatch rejected, {why}"
                );
                Ok(DispatchOutcome::Retrying {
                    job_id: job.job_id,
                    retry_count: job.retry_count,
                })
            }
            Decision::MarkFailed { reason: why } => {
                job.mark_failed(now);
                self.jobs.save_job(&job).await?;
                let change = ProgressChange::MarkFailed {
                    milestone: job.milestone,
                    reason: reason.clone(),
                };
                self.apply_to_visit(&job, change).await?;
                error!(
                    visit_id = %job.visit_id,
                    milestone = %job.milestone,
                    job_id = %job.job_id,
                    error = %reason,
                    "job failed: {why}"
                );
                Ok(DispatchOutcome::Failed { job_id: job.job_id })
            }
        }
    }

    /// ジョブの結果を Visit の progress に反映する
    ///
    /// Visit が消えている場合や遷移が成立しない場合はログだけ残す。
    /// ジョブ側の結果は保存済み。
    async fn apply_to_visit(
        &self,
        job: &QueueJob,
        change: ProgressChange,
    ) -> Result<(), SyncError> {
        match self.visits.apply_progress(&job.visit_id, change).await {
            Ok(ProgressOutcome::Applied(_) | ProgressOutcome::Unchanged(_)) => Ok(()),
            Ok(ProgressOutcome::Rejected(e)) => {
                warn!(visit_id = %job.visit_id, job_id = %job.job_id, error = %e, "job result left progress unchanged");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                warn!(visit_id = %job.visit_id, job_id = %job.job_id, "job result for missing visit");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// FAILED ジョブをリトライ回数をリセットして PENDING に戻す
    pub async fn retry_job(&self, job_id: JobId) -> Result<QueueJob, SyncError> {
        let mut job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Failed {
            return Err(SyncError::InvalidState(format!(
                "job {job_id} is {:?}, only FAILED jobs can be retried",
                job.status
            )));
        }
        job.reset_for_retry(self.clock.now());
        self.jobs.save_job(&job).await?;
        info!(job_id = %job_id, visit_id = %job.visit_id, "job reset for retry");
        Ok(job)
    }
}
