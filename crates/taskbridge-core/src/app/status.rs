//! Status - 診断用の読み取りクエリ
//!
//! 書き込みは一切しない。CLI の `status` と運用画面が使う。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::refresh_cache::{RefreshCacheStats, RefreshLocks};
use super::task_validator::TaskValidator;
use crate::domain::{
    DispatchAttempt, JobId, JobStatus, PollingWatermark, QueueJob, SyncError, TaskProgress,
    ValidationIssue,
};
use crate::ports::{QueueStats, Stores};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitStatus {
    pub visit_id: String,
    pub progress: TaskProgress,
    pub registered_at: Option<DateTime<Utc>>,
}

/// 運用者が最初に見る情報一式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub watermarks: Vec<PollingWatermark>,
    pub queue: QueueStats,
    pub refresh_cache: RefreshCacheStats,
    pub visits_with_pending_issues: usize,
}

pub struct StatusService {
    stores: Stores,
    locks: Arc<RefreshLocks>,
    task_validator: Arc<TaskValidator>,
}

impl StatusService {
    pub fn new(stores: Stores, locks: Arc<RefreshLocks>, task_validator: Arc<TaskValidator>) -> Self {
        Self {
            stores,
            locks,
            task_validator,
        }
    }

    pub async fn watermarks(&self) -> Result<Vec<PollingWatermark>, SyncError> {
        Ok(self.stores.watermarks.list_watermarks().await?)
    }

    pub async fn visit_progress(&self, visit_id: &str) -> Result<Option<VisitStatus>, SyncError> {
        let visit = self.stores.visits.get_visit(visit_id).await?;
        Ok(visit.map(|v| VisitStatus {
            visit_id: v.visit_id,
            progress: v.progress,
            registered_at: v.registered_at,
        }))
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, SyncError> {
        Ok(self.stores.jobs.queue_stats().await?)
    }

    pub fn refresh_cache_stats(&self) -> RefreshCacheStats {
        self.locks.stats()
    }

    pub async fn pending_issues_by_visit(
        &self,
        limit: usize,
    ) -> Result<BTreeMap<String, Vec<ValidationIssue>>, SyncError> {
        self.task_validator.pending_by_visit(limit).await
    }

    pub async fn jobs_with_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<QueueJob>, SyncError> {
        Ok(self.stores.jobs.jobs_with_status(status, limit).await?)
    }

    pub async fn attempts_for_job(&self, job_id: JobId) -> Result<Vec<DispatchAttempt>, SyncError> {
        Ok(self.stores.dispatch_log.attempts_for_job(job_id).await?)
    }

    pub async fn report(&self, issue_limit: usize) -> Result<StatusReport, SyncError> {
        Ok(StatusReport {
            watermarks: self.watermarks().await?,
            queue: self.queue_stats().await?,
            refresh_cache: self.refresh_cache_stats(),
            visits_with_pending_issues: self.pending_issues_by_visit(issue_limit).await?.len(),
        })
    }
}
