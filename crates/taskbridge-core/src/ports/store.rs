//! Store ports - 永続化の抽象化
//!
//! 集約ごとに trait を分けています。リレーショナル DB を想定しますが必須ではない。
//!
//! # 一意性
//! - Visit: visit_id
//! - QueueJob: (visit_id, milestone)
//! - ScheduleSnapshot: (clinic, provider, date, start_time)
//!
//! 一意性はロックではなく store 側の制約で守り、違反は `StoreError::Duplicate` で返す。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    DispatchAttempt, IssueId, IssueStatus, JobId, JobStatus, Milestone, PollingWatermark,
    ProgressChange, ProgressOutcome, QueueJob, ScheduleSnapshot, StatusKind, ValidationIssue,
    Visit,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait VisitStore: Send + Sync {
    async fn insert_visit(&self, visit: Visit) -> Result<(), StoreError>;

    async fn get_visit(&self, visit_id: &str) -> Result<Option<Visit>, StoreError>;

    /// マイルストーン 1 件分の変更を store のロック（または行ロック）内で適用する
    ///
    /// 遷移は事前に読んだコピーではなく保存済みの progress に対して判定する。
    /// 同じ Visit の別マイルストーンを並行して書いても失われない。
    ///
    /// Visit が無ければ `NotFound`。
    async fn apply_progress(
        &self,
        visit_id: &str,
        change: ProgressChange,
    ) -> Result<ProgressOutcome, StoreError>;

    /// `milestone` が `statuses` のいずれかで、(visit, milestone) の QueueJob が
    /// まだ無い Visit。古い順。
    async fn unqueued_visits(
        &self,
        milestone: Milestone,
        statuses: &[StatusKind],
        limit: usize,
    ) -> Result<Vec<Visit>, StoreError>;

    /// `milestone` が `statuses` のいずれかの Visit（ジョブの有無は問わない）
    async fn visits_with_status(
        &self,
        milestone: Milestone,
        statuses: &[StatusKind],
        limit: usize,
    ) -> Result<Vec<Visit>, StoreError>;
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load_watermark(
        &self,
        stream: Milestone,
    ) -> Result<Option<PollingWatermark>, StoreError>;

    async fn save_watermark(&self, watermark: &PollingWatermark) -> Result<(), StoreError>;

    async fn list_watermarks(&self) -> Result<Vec<PollingWatermark>, StoreError>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// その日の医師の最も早い診療枠
    async fn find_schedule(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ScheduleSnapshot>, StoreError>;

    /// `date` の前後 `window_days` 日以内で最も新しい日付のスナップショット
    async fn nearest_schedule(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Option<ScheduleSnapshot>, StoreError>;

    /// 枠を挿入、または置き換える
    async fn upsert_schedule(&self, snapshot: ScheduleSnapshot) -> Result<(), StoreError>;

    /// 未登録の枠のときだけ挿入し、挿入したかどうかを返す
    async fn insert_schedule_if_absent(
        &self,
        snapshot: ScheduleSnapshot,
    ) -> Result<bool, StoreError>;
}

/// status 表示用の件数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
    pub avg_retry_count: f64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: QueueJob) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<QueueJob>, StoreError>;

    async fn find_job(
        &self,
        visit_id: &str,
        milestone: Milestone,
    ) -> Result<Option<QueueJob>, StoreError>;

    async fn oldest_pending_job(&self) -> Result<Option<QueueJob>, StoreError>;

    async fn save_job(&self, job: &QueueJob) -> Result<(), StoreError>;

    async fn jobs_with_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<QueueJob>, StoreError>;

    /// Visit の未 SENT ジョブをすべて削除し、件数を返す
    async fn delete_unsent_jobs(&self, visit_id: &str) -> Result<usize, StoreError>;

    async fn queue_stats(&self) -> Result<QueueStats, StoreError>;
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    /// 同じ visit・理由の PENDING issue が無ければ挿入し、挿入したかどうかを返す
    async fn insert_issue_if_absent(&self, issue: ValidationIssue) -> Result<bool, StoreError>;

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<ValidationIssue>, StoreError>;

    async fn save_issue(&self, issue: &ValidationIssue) -> Result<(), StoreError>;

    async fn issues_for_visit(&self, visit_id: &str) -> Result<Vec<ValidationIssue>, StoreError>;

    async fn issues_with_status(
        &self,
        status: IssueStatus,
        limit: usize,
    ) -> Result<Vec<ValidationIssue>, StoreError>;
}

#[async_trait]
pub trait DispatchLogStore: Send + Sync {
    async fn append_attempt(&self, attempt: DispatchAttempt) -> Result<(), StoreError>;

    async fn attempts_for_job(&self, job_id: JobId) -> Result<Vec<DispatchAttempt>, StoreError>;
}

/// 全 store へのハンドル（各サービスで共有）
#[derive(Clone)]
pub struct Stores {
    pub visits: Arc<dyn VisitStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub jobs: Arc<dyn JobStore>,
    pub issues: Arc<dyn IssueStore>,
    pub dispatch_log: Arc<dyn DispatchLogStore>,
}

impl Stores {
    /// すべて同じ実装で賄う
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: VisitStore
            + WatermarkStore
            + ScheduleStore
            + JobStore
            + IssueStore
            + DispatchLogStore
            + 'static,
    {
        Self {
            visits: store.clone(),
            watermarks: store.clone(),
            schedules: store.clone(),
            jobs: store.clone(),
            issues: store.clone(),
            dispatch_log: store,
        }
    }
}
