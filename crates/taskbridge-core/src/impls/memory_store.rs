//! In-memory store implementation.
//!
//! Implements every store port over one state guarded by a tokio Mutex.
//! Used by the CLI (single process, nothing survives a restart) and by the
//! tests. A relational implementation enforces the same uniqueness rules
//! with unique indexes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::domain::{
    DispatchAttempt, IssueId, IssueStatus, JobId, JobStatus, Milestone, PollingWatermark,
    ProgressChange, ProgressOutcome, QueueJob, ScheduleSnapshot, StatusKind, ValidationIssue,
    Visit,
};
use crate::ports::{
    DispatchLogStore, IssueStore, JobStore, QueueStats, ScheduleStore, StoreError, VisitStore,
    WatermarkStore,
};

#[derive(Default)]
struct InMemoryState {
    /// Visits by key (single source of truth).
    visits: HashMap<String, Visit>,

    /// Insertion order of visits, for "oldest first" scans.
    visit_order: Vec<String>,

    watermarks: BTreeMap<Milestone, PollingWatermark>,

    schedules: Vec<ScheduleSnapshot>,

    jobs: HashMap<JobId, QueueJob>,

    /// (visit, milestone) -> job, the uniqueness index.
    job_index: HashMap<(String, Milestone), JobId>,

    issues: Vec<ValidationIssue>,

    attempts: Vec<DispatchAttempt>,
}

impl InMemoryState {
    fn has_job(&self, visit_id: &str, milestone: Milestone) -> bool {
        self.job_index
            .contains_key(&(visit_id.to_string(), milestone))
    }

    fn visits_matching<'a>(
        &'a self,
        milestone: Milestone,
        statuses: &'a [StatusKind],
    ) -> impl Iterator<Item = &'a Visit> + 'a {
        self.visit_order
            .iter()
            .filter_map(|id| self.visits.get(id))
            .filter(move |v| {
                v.progress
                    .status_kind(milestone)
                    .is_some_and(|kind| statuses.contains(&kind))
            })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VisitStore for InMemoryStore {
    async fn insert_visit(&self, visit: Visit) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        if st.visits.contains_key(&visit.visit_id) {
            return Err(StoreError::Duplicate(format!("visit {}", visit.visit_id)));
        }
        st.visit_order.push(visit.visit_id.clone());
        st.visits.insert(visit.visit_id.clone(), visit);
        Ok(())
    }

    async fn get_visit(&self, visit_id: &str) -> Result<Option<Visit>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.visits.get(visit_id).cloned())
    }

    async fn apply_progress(
        &self,
        visit_id: &str,
        change: ProgressChange,
    ) -> Result<ProgressOutcome, StoreError> {
        let mut st = self.state.lock().await;
        let stored = st
            .visits
            .get_mut(visit_id)
            .ok_or_else(|| StoreError::NotFound(format!("visit {visit_id}")))?;

        let mut next = stored.clone();
        match next.apply(change) {
            Ok(true) => {
                *stored = next.clone();
                Ok(ProgressOutcome::Applied(next))
            }
            Ok(false) => Ok(ProgressOutcome::Unchanged(next)),
            Err(e) => Ok(ProgressOutcome::Rejected(e)),
        }
    }

    async fn unqueued_visits(
        &self,
        milestone: Milestone,
        statuses: &[StatusKind],
        limit: usize,
    ) -> Result<Vec<Visit>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .visits_matching(milestone, statuses)
            .filter(|v| !st.has_job(&v.visit_id, milestone))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn visits_with_status(
        &self,
        milestone: Milestone,
        statuses: &[StatusKind],
        limit: usize,
    ) -> Result<Vec<Visit>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .visits_matching(milestone, statuses)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WatermarkStore for InMemoryStore {
    async fn load_watermark(
        &self,
        stream: Milestone,
    ) -> Result<Option<PollingWatermark>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.watermarks.get(&stream).cloned())
    }

    async fn save_watermark(&self, watermark: &PollingWatermark) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.watermarks.insert(watermark.stream, watermark.clone());
        Ok(())
    }

    async fn list_watermarks(&self) -> Result<Vec<PollingWatermark>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.watermarks.values().cloned().collect())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn find_schedule(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ScheduleSnapshot>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .schedules
            .iter()
            .filter(|s| s.clinic_id == clinic_id && s.provider_id == provider_id && s.date == date)
            .min_by_key(|s| s.start_time)
            .cloned())
    }

    async fn nearest_schedule(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Option<ScheduleSnapshot>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .schedules
            .iter()
            .filter(|s| s.clinic_id == clinic_id && s.provider_id == provider_id)
            .filter(|s| (s.date - date).num_days().abs() <= window_days)
            .max_by(|a, b| a.date.cmp(&b.date).then(b.start_time.cmp(&a.start_time)))
            .cloned())
    }

    async fn upsert_schedule(&self, snapshot: ScheduleSnapshot) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        match st.schedules.iter_mut().find(|s| s.same_slot(&snapshot)) {
            Some(existing) => *existing = snapshot,
            None => st.schedules.push(snapshot),
        }
        Ok(())
    }

    async fn insert_schedule_if_absent(
        &self,
        snapshot: ScheduleSnapshot,
    ) -> Result<bool, StoreError> {
        let mut st = self.state.lock().await;
        if st.schedules.iter().any(|s| s.same_slot(&snapshot)) {
            return Ok(false);
        }
        st.schedules.push(snapshot);
        Ok(true)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, job: QueueJob) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let key = (job.visit_id.clone(), job.milestone);
        if st.job_index.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "job for visit {} {}",
                job.visit_id, job.milestone
            )));
        }
        st.job_index.insert(key, job.job_id);
        st.jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<QueueJob>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.jobs.get(&job_id).cloned())
    }

    async fn find_job(
        &self,
        visit_id: &str,
        milestone: Milestone,
    ) -> Result<Option<QueueJob>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .job_index
            .get(&(visit_id.to_string(), milestone))
            .and_then(|id| st.jobs.get(id))
            .cloned())
    }

    async fn oldest_pending_job(&self) -> Result<Option<QueueJob>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.job_id))
            .cloned())
    }

    async fn save_job(&self, job: &QueueJob) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        match st.jobs.get_mut(&job.job_id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("job {}", job.job_id))),
        }
    }

    async fn jobs_with_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<QueueJob>, StoreError> {
        let st = self.state.lock().await;
        let mut jobs: Vec<QueueJob> = st
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.job_id));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn delete_unsent_jobs(&self, visit_id: &str) -> Result<usize, StoreError> {
        let mut st = self.state.lock().await;
        let doomed: Vec<JobId> = st
            .jobs
            .values()
            .filter(|j| j.visit_id == visit_id && j.status != JobStatus::Sent)
            .map(|j| j.job_id)
            .collect();
        for id in &doomed {
            if let Some(job) = st.jobs.remove(id) {
                st.job_index.remove(&(job.visit_id, job.milestone));
            }
        }
        Ok(doomed.len())
    }

    async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let st = self.state.lock().await;
        let mut stats = QueueStats::default();
        let mut retries = 0u64;
        for job in st.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Sent => stats.sent += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            retries += u64::from(job.retry_count);
        }
        if !st.jobs.is_empty() {
            stats.avg_retry_count = retries as f64 / st.jobs.len() as f64;
        }
        Ok(stats)
    }
}

#[async_trait]
impl IssueStore for InMemoryStore {
    async fn insert_issue_if_absent(&self, issue: ValidationIssue) -> Result<bool, StoreError> {
        let mut st = self.state.lock().await;
        if st.issues.iter().any(|existing| existing.duplicates(&issue)) {
            return Ok(false);
        }
        st.issues.push(issue);
        Ok(true)
    }

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<ValidationIssue>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.issues.iter().find(|i| i.issue_id == issue_id).cloned())
    }

    async fn save_issue(&self, issue: &ValidationIssue) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        match st.issues.iter_mut().find(|i| i.issue_id == issue.issue_id) {
            Some(existing) => {
                *existing = issue.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("issue {}", issue.issue_id))),
        }
    }

    async fn issues_for_visit(&self, visit_id: &str) -> Result<Vec<ValidationIssue>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .issues
            .iter()
            .filter(|i| i.visit_id == visit_id)
            .cloned()
            .collect())
    }

    async fn issues_with_status(
        &self,
        status: IssueStatus,
        limit: usize,
    ) -> Result<Vec<ValidationIssue>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .issues
            .iter()
            .filter(|i| i.status == status)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DispatchLogStore for InMemoryStore {
    async fn append_attempt(&self, attempt: DispatchAttempt) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        st.attempts.push(attempt);
        Ok(())
    }

    async fn attempts_for_job(&self, job_id: JobId) -> Result<Vec<DispatchAttempt>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .attempts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Admission, JobPayload, MilestoneUpdatePayload, PayloadSnapshot, ScheduleSource,
        TaskProgress, TransitionError,
    };
    use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 24, 1, 0, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn visit(id: &str) -> Visit {
        Visit {
            visit_id: id.into(),
            clinic_id: "ANA".into(),
            provider_id: "101".into(),
            visit_date: date(24),
            queue_number: "001".into(),
            queue_seq: 1,
            insured: false,
            progress: TaskProgress::new(),
            snapshot: PayloadSnapshot::default(),
            registered_at: None,
            created_at: now(),
        }
    }

    fn job(visit_id: &str, milestone: Milestone) -> QueueJob {
        let payload = JobPayload::MilestoneUpdate(MilestoneUpdatePayload {
            kodebooking: visit_id.into(),
            taskid: milestone.id(),
            waktu: 0,
        });
        QueueJob::new(JobId::from_ulid(Ulid::new()), visit_id, milestone, payload, now())
    }

    fn snapshot(d: u32, start_h: u32) -> ScheduleSnapshot {
        ScheduleSnapshot {
            clinic_id: "ANA".into(),
            provider_id: "101".into(),
            date: date(d),
            start_time: NaiveTime::from_hms_opt(start_h, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(start_h + 4, 0, 0).unwrap(),
            quota: 20,
            clinic_name: None,
            provider_name: None,
            source: ScheduleSource::Manual,
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn duplicate_visit_is_rejected() {
        let store = InMemoryStore::new();
        store.insert_visit(visit("V1")).await.unwrap();
        let err = store.insert_visit(visit("V1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    fn at(h: u32) -> NaiveDateTime {
        date(24).and_hms_opt(h, 0, 0).unwrap()
    }

    fn registered(id: &str) -> Visit {
        let mut v = visit(id);
        v.progress.admit(Admission::Ready, Some(at(7))).unwrap();
        v.progress.mark_sent(Milestone::Register, now()).unwrap();
        v
    }

    #[tokio::test]
    async fn progress_changes_for_different_milestones_both_survive() {
        let store = InMemoryStore::new();
        store.insert_visit(registered("V1")).await.unwrap();

        // 読み取り済みのコピーではなく、保存済みの最新状態に積み重なる
        for (milestone, h) in [(Milestone::CheckIn, 8), (Milestone::ServiceStart, 9)] {
            let change = ProgressChange::RecordEvent {
                milestone,
                event_time: at(h),
            };
            let outcome = store.apply_progress("V1", change).await.unwrap();
            assert!(matches!(outcome, ProgressOutcome::Applied(_)));
        }

        let change = ProgressChange::MarkSent {
            milestone: Milestone::CheckIn,
            sent_at: now(),
        };
        let ProgressOutcome::Applied(after) = store.apply_progress("V1", change).await.unwrap()
        else {
            panic!("check-in should be sendable");
        };
        assert_eq!(after.progress.status_kind(Milestone::CheckIn), Some(StatusKind::Sent));
        assert_eq!(after.progress.status_kind(Milestone::ServiceStart), Some(StatusKind::Draft));

        let stored = store.get_visit("V1").await.unwrap().unwrap();
        assert_eq!(stored, after);
    }

    #[tokio::test]
    async fn rejected_and_unchanged_progress_is_not_written() {
        let store = InMemoryStore::new();
        store.insert_visit(registered("V1")).await.unwrap();
        let before = store.get_visit("V1").await.unwrap().unwrap();

        let skip_dependency = ProgressChange::MarkSent {
            milestone: Milestone::ServiceStart,
            sent_at: now(),
        };
        let outcome = store.apply_progress("V1", skip_dependency).await.unwrap();
        assert!(matches!(
            outcome,
            ProgressOutcome::Rejected(TransitionError::Illegal { .. })
        ));

        let re_admit = ProgressChange::Admit {
            admission: Admission::Ready,
            event_time: None,
            snapshot: None,
        };
        let outcome = store.apply_progress("V1", re_admit).await.unwrap();
        assert!(matches!(outcome, ProgressOutcome::Rejected(_)));
        assert_eq!(store.get_visit("V1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn progress_for_unknown_visit_is_not_found() {
        let store = InMemoryStore::new();
        let change = ProgressChange::RecordEvent {
            milestone: Milestone::CheckIn,
            event_time: at(8),
        };
        let err = store.apply_progress("nope", change).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn one_job_per_visit_and_milestone() {
        let store = InMemoryStore::new();
        store.insert_job(job("V1", Milestone::CheckIn)).await.unwrap();
        let err = store
            .insert_job(job("V1", Milestone::CheckIn))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        store.insert_job(job("V1", Milestone::ServiceStart)).await.unwrap();
    }

    #[tokio::test]
    async fn delete_unsent_frees_the_pair() {
        let store = InMemoryStore::new();
        let mut sent = job("V1", Milestone::CheckIn);
        sent.mark_sent(now());
        store.insert_job(sent).await.unwrap();
        store.insert_job(job("V1", Milestone::ServiceStart)).await.unwrap();

        assert_eq!(store.delete_unsent_jobs("V1").await.unwrap(), 1);
        assert!(store.find_job("V1", Milestone::CheckIn).await.unwrap().is_some());
        store.insert_job(job("V1", Milestone::ServiceStart)).await.unwrap();
    }

    #[tokio::test]
    async fn nearest_schedule_prefers_latest_date_in_window() {
        let store = InMemoryStore::new();
        store.upsert_schedule(snapshot(17, 8)).await.unwrap();
        store.upsert_schedule(snapshot(20, 8)).await.unwrap();
        store.upsert_schedule(snapshot(10, 8)).await.unwrap();

        let found = store
            .nearest_schedule("ANA", "101", date(24), 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.date, date(20));

        let none = store.nearest_schedule("ANA", "101", date(5), 3).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_existing_slot() {
        let store = InMemoryStore::new();
        assert!(store.insert_schedule_if_absent(snapshot(24, 8)).await.unwrap());

        let mut other = snapshot(24, 8);
        other.quota = 99;
        assert!(!store.insert_schedule_if_absent(other).await.unwrap());
        let found = store.find_schedule("ANA", "101", date(24)).await.unwrap().unwrap();
        assert_eq!(found.quota, 20);
    }

    #[tokio::test]
    async fn queue_stats_average_retries() {
        let store = InMemoryStore::new();
        let mut failing = job("V1", Milestone::CheckIn);
        failing.record_failure("x".into(), now());
        failing.record_failure("y".into(), now());
        failing.mark_failed(now());
        store.insert_job(failing).await.unwrap();
        store.insert_job(job("V2", Milestone::CheckIn)).await.unwrap();

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 0);
        assert!((stats.avg_retry_count - 1.0).abs() < f64::EPSILON);
    }
}
