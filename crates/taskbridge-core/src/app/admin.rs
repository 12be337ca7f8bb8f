//! Admin - 運用者向けの操作
//!
//! - Visit の再検証（BLOCKED → READY）と BLOCKED の定期再検証
//! - 詰まったジョブの削除、FAILED ジョブの手動リトライ
//! - 診療枠の手動 refresh（clinic × date ごとに結果を返す）
//! - issue の resolve / ignore

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use super::admission::{RegistrationAdmitter, RegistrationKey};
use super::dispatch::DispatchWorker;
use super::quota::ScheduleRefresher;
use super::refresh_cache::RefreshLocks;
use super::task_validator::TaskValidator;
use crate::domain::{
    ErrorKind, IssueId, JobId, Milestone, ProgressChange, ProgressOutcome, QueueJob, StatusKind,
    SyncError, ValidationIssue,
};
use crate::ports::{JobStore, VisitStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationReport {
    pub checked: usize,
    pub now_ready: usize,
    pub errors: usize,
}

/// 手動 refresh 1 件分の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub clinic_id: String,
    pub date: NaiveDate,
    pub written: Option<usize>,
    pub error: Option<String>,
}

pub struct AdminService {
    visits: Arc<dyn VisitStore>,
    jobs: Arc<dyn JobStore>,
    admitter: Arc<RegistrationAdmitter>,
    refresher: ScheduleRefresher,
    locks: Arc<RefreshLocks>,
    task_validator: Arc<TaskValidator>,
    worker: Arc<DispatchWorker>,
    refresh_delay: Duration,
}

impl AdminService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        visits: Arc<dyn VisitStore>,
        jobs: Arc<dyn JobStore>,
        admitter: Arc<RegistrationAdmitter>,
        refresher: ScheduleRefresher,
        locks: Arc<RefreshLocks>,
        task_validator: Arc<TaskValidator>,
        worker: Arc<DispatchWorker>,
        refresh_delay: Duration,
    ) -> Self {
        Self {
            visits,
            jobs,
            admitter,
            refresher,
            locks,
            task_validator,
            worker,
            refresh_delay,
        }
    }

    /// 未 SENT の受付について受付判定をやり直し、新しい状態を返す
    pub async fn revalidate_visit(&self, visit_id: &str) -> Result<StatusKind, SyncError> {
        let visit = self
            .visits
            .get_visit(visit_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("visit {visit_id}")))?;
        if visit.progress.is_sent(Milestone::Register) {
            return Err(SyncError::InvalidState(format!(
                "visit {visit_id} is already registered"
            )));
        }

        let assessment = self
            .admitter
            .assess(RegistrationKey {
                clinic_id: &visit.clinic_id,
                provider_id: &visit.provider_id,
                visit_date: visit.visit_date,
                queue_number: &visit.queue_number,
            })
            .await?;

        let snapshot = assessment.is_ready().then(|| {
            assessment.snapshot(
                visit.snapshot.medical_record_no.clone(),
                Some(visit.snapshot.visit_type),
            )
        });
        let change = ProgressChange::Admit {
            admission: assessment.admission.clone(),
            event_time: None,
            snapshot,
        };
        // 検証中に dispatch が SENT にしていれば、ここで遷移が拒否される
        match self.visits.apply_progress(visit_id, change).await? {
            ProgressOutcome::Applied(_) | ProgressOutcome::Unchanged(_) => {}
            ProgressOutcome::Rejected(e) => {
                return Err(SyncError::InvalidState(format!("visit {visit_id}: {e}")));
            }
        }

        let status = if assessment.is_ready() {
            StatusKind::Ready
        } else {
            StatusKind::Blocked
        };
        info!(visit_id, status = ?status, "visit revalidated");
        Ok(status)
    }

    /// BLOCKED の受付を再検証する。接続エラーが出たらそこで打ち切る
    pub async fn revalidate_blocked(&self, limit: usize) -> Result<RevalidationReport, SyncError> {
        let blocked = self
            .visits
            .visits_with_status(Milestone::Register, &[StatusKind::Blocked], limit)
            .await?;

        let mut report = RevalidationReport::default();
        for visit in blocked {
            report.checked += 1;
            match self.revalidate_visit(&visit.visit_id).await {
                Ok(StatusKind::Ready) => report.now_ready += 1,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Transient => return Err(e),
                Err(e) => {
                    warn!(visit_id = %visit.visit_id, error = %e, "revalidation failed");
                    report.errors += 1;
                }
            }
        }
        if report.checked > 0 {
            info!(checked = report.checked, now_ready = report.now_ready, "blocked visits revalidated");
        }
        Ok(report)
    }

    /// 未 SENT のジョブを削除し、builder が再投入できるようにする
    pub async fn delete_stuck_jobs(&self, visit_id: &str) -> Result<usize, SyncError> {
        let deleted = self.jobs.delete_unsent_jobs(visit_id).await?;
        info!(visit_id, deleted, "unsent jobs deleted");
        Ok(deleted)
    }

    pub async fn retry_job(&self, job_id: JobId) -> Result<QueueJob, SyncError> {
        self.worker.retry_job(job_id).await
    }

    /// Refresh every clinic × date pair from the authority, one call at a time.
    pub async fn refresh_schedules(
        &self,
        clinics: &[String],
        dates: &[NaiveDate],
    ) -> Vec<RefreshResult> {
        let mut results = Vec::with_capacity(clinics.len() * dates.len());
        for clinic_id in clinics {
            for &date in dates {
                if !results.is_empty() {
                    sleep(self.refresh_delay).await;
                }
                let outcome = self.refresher.refresh(clinic_id, date).await;
                let key = (clinic_id.clone(), date);
                let result = match outcome {
                    Ok(written) => {
                        self.locks.complete(&key);
                        RefreshResult {
                            clinic_id: clinic_id.clone(),
                            date,
                            written: Some(written),
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!(clinic_id = %clinic_id, %date, error = %e, "schedule refresh failed");
                        self.locks.fail(&key, e.to_string());
                        RefreshResult {
                            clinic_id: clinic_id.clone(),
                            date,
                            written: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                results.push(result);
            }
        }
        results
    }

    pub async fn resolve_issue(
        &self,
        issue_id: IssueId,
        note: &str,
    ) -> Result<ValidationIssue, SyncError> {
        self.task_validator.resolve(issue_id, note).await
    }

    pub async fn ignore_issue(
        &self,
        issue_id: IssueId,
        note: &str,
    ) -> Result<ValidationIssue, SyncError> {
        self.task_validator.ignore(issue_id, note).await
    }
}
