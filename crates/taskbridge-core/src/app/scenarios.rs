//! End-to-end runs of the wired pipeline against in-memory adapters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use super::builder::{Pipeline, PipelineBuilder};
use super::dispatch::DispatchOutcome;
use crate::config::SyncConfig;
use crate::domain::{
    DayName, IssueReason, IssueStatus, JobStatus, Milestone, PollingWatermark, ProgressChange,
    ProgressOutcome, ScheduleSource, StatusKind, Visit,
};
use crate::impls::{InMemorySource, InMemoryStore, StubAuthority};
use crate::ports::{
    AuthoritySchedule, FixedClock, IssueStore, JobStore, MilestoneRow, RegisterRow, ScheduleStore,
    StoreError, Stores, VisitStore, WatermarkStore, WeekdaySchedule,
};

struct Harness {
    pipeline: Pipeline,
    store: Arc<InMemoryStore>,
    source: Arc<InMemorySource>,
    authority: Arc<StubAuthority>,
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 24).unwrap()
}

fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn harness_with(config: SyncConfig) -> Harness {
    wired(config, Stores::shared)
}

/// `harness` と同じだが、共有 store の前にラッパーを挟める
fn wired(config: SyncConfig, stores: impl FnOnce(Arc<InMemoryStore>) -> Stores) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(InMemorySource::new());
    let authority = Arc::new(StubAuthority::new());
    // 2026-01-24 10:00 WIB
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 1, 24, 3, 0, 0).unwrap(),
    ));
    let pipeline = PipelineBuilder::new(config)
        .stores(stores(store.clone()))
        .source(source.clone())
        .authority(authority.clone())
        .clock(clock)
        .build()
        .unwrap();
    Harness {
        pipeline,
        store,
        source,
        authority,
    }
}

/// visit 系の呼び出しごとに yield する。同じスレッドで join したタスクが
/// 読み取りと書き込みの間で交互に進む。
struct YieldingVisits(Arc<InMemoryStore>);

#[async_trait]
impl VisitStore for YieldingVisits {
    async fn insert_visit(&self, visit: Visit) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.insert_visit(visit).await
    }

    async fn get_visit(&self, visit_id: &str) -> Result<Option<Visit>, StoreError> {
        tokio::task::yield_now().await;
        let visit = self.0.get_visit(visit_id).await;
        tokio::task::yield_now().await;
        visit
    }

    async fn apply_progress(
        &self,
        visit_id: &str,
        change: ProgressChange,
    ) -> Result<ProgressOutcome, StoreError> {
        tokio::task::yield_now().await;
        self.0.apply_progress(visit_id, change).await
    }

    async fn unqueued_visits(
        &self,
        milestone: Milestone,
        statuses: &[StatusKind],
        limit: usize,
    ) -> Result<Vec<Visit>, StoreError> {
        tokio::task::yield_now().await;
        self.0.unqueued_visits(milestone, statuses, limit).await
    }

    async fn visits_with_status(
        &self,
        milestone: Milestone,
        statuses: &[StatusKind],
        limit: usize,
    ) -> Result<Vec<Visit>, StoreError> {
        tokio::task::yield_now().await;
        self.0.visits_with_status(milestone, statuses, limit).await
    }
}

fn interleaving_harness() -> Harness {
    let mut config = SyncConfig::default();
    config.schedule.refresh_call_delay = Duration::ZERO;
    wired(config, |store| Stores {
        visits: Arc::new(YieldingVisits(store.clone())),
        ..Stores::shared(store)
    })
}

/// pending カーソルが保存された後、続く `failures` 回の watermark 保存を失敗させる
struct FlakyWatermarks {
    inner: Arc<InMemoryStore>,
    tripped: AtomicBool,
    failures: AtomicU32,
}

#[async_trait]
impl WatermarkStore for FlakyWatermarks {
    async fn load_watermark(
        &self,
        stream: Milestone,
    ) -> Result<Option<PollingWatermark>, StoreError> {
        self.inner.load_watermark(stream).await
    }

    async fn save_watermark(&self, watermark: &PollingWatermark) -> Result<(), StoreError> {
        if self.tripped.load(Ordering::SeqCst)
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Unavailable("watermark table locked".into()));
        }
        if watermark.pending_cursor.is_some() {
            self.tripped.store(true, Ordering::SeqCst);
        }
        self.inner.save_watermark(watermark).await
    }

    async fn list_watermarks(&self) -> Result<Vec<PollingWatermark>, StoreError> {
        self.inner.list_watermarks().await
    }
}

fn flaky_watermark_harness(failures: u32) -> Harness {
    let mut config = SyncConfig::default();
    config.schedule.refresh_call_delay = Duration::ZERO;
    wired(config, |store| Stores {
        watermarks: Arc::new(FlakyWatermarks {
            inner: store.clone(),
            tripped: AtomicBool::new(false),
            failures: AtomicU32::new(failures),
        }),
        ..Stores::shared(store)
    })
}

fn harness() -> Harness {
    let mut config = SyncConfig::default();
    config.schedule.refresh_call_delay = Duration::ZERO;
    harness_with(config)
}

fn registration(visit_id: &str, clinic: &str, provider: &str, time: NaiveTime) -> RegisterRow {
    RegisterRow {
        visit_id: visit_id.into(),
        clinic_id: clinic.into(),
        provider_id: provider.into(),
        visit_date: day(),
        registered_time: time,
        queue_number: "A-001".into(),
        insured: true,
        medical_record_no: Some("RM-0001".into()),
        visit_type: None,
    }
}

fn weekday(clinic: &str, provider: &str) -> WeekdaySchedule {
    WeekdaySchedule {
        clinic_id: clinic.into(),
        provider_id: provider.into(),
        day: DayName::Sabtu,
        start_time: Some(at(8, 0)),
        end_time: Some(at(12, 0)),
        quota: Some(20),
        clinic_name: Some("Anak".into()),
        provider_name: Some("dr. Sari".into()),
    }
}

fn milestone_row(visit_id: &str, time: NaiveTime) -> MilestoneRow {
    MilestoneRow {
        visit_id: visit_id.into(),
        event_date: day(),
        event_time: time,
    }
}

impl Harness {
    /// V1 を ANA/33690 で受付し、保険者に受理させる
    async fn registered_visit(&self) {
        self.source.push_weekday_schedule(weekday("ANA", "33690"));
        self.source
            .push_registration(registration("V1", "ANA", "33690", at(8, 5)));
        self.pipeline.poller.poll(Milestone::Register).await.unwrap();
        let built = self.pipeline.queue_builder.build_once().await.unwrap();
        assert_eq!(built.registrations_queued, 1);
        let outcome = self.pipeline.worker.process_next().await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    }

    async fn pending_issues(&self, visit_id: &str) -> Vec<crate::domain::ValidationIssue> {
        self.store
            .issues_for_visit(visit_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|i| i.status == IssueStatus::Pending)
            .collect()
    }
}

#[tokio::test]
async fn auto_fetched_schedule_admits_registration() {
    let h = harness();
    h.source.push_weekday_schedule(weekday("A", "D"));
    h.source.push_registration(registration("V1", "A", "D", at(8, 5)));

    let report = h.pipeline.poller.poll(Milestone::Register).await.unwrap();
    assert_eq!(report.applied, 1);

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert_eq!(visit.progress.status_kind(Milestone::Register), Some(StatusKind::Ready));
    assert_eq!(visit.snapshot.practice_hours.as_deref(), Some("08:00-12:00"));
    assert_eq!(visit.snapshot.capacity, 20);
    assert_eq!(visit.snapshot.remaining, 19);
    assert_eq!(visit.snapshot.non_insured_capacity, 6);
    // 08:00 + 1 slot of 6 minutes, WIB
    let expected = Utc.with_ymd_and_hms(2026, 1, 24, 1, 6, 0).unwrap();
    assert_eq!(visit.snapshot.estimated_service_ms, Some(expected.timestamp_millis()));

    let schedule = h.store.find_schedule("A", "D", day()).await.unwrap().unwrap();
    assert_eq!(schedule.source, ScheduleSource::AutoFetch);
}

#[tokio::test]
async fn non_numeric_provider_is_a_payload_defect() {
    let h = harness();
    h.source.push_weekday_schedule(weekday("A", "D"));
    h.source.push_registration(registration("V1", "A", "D", at(8, 5)));
    h.pipeline.poller.poll(Milestone::Register).await.unwrap();

    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.registrations_queued, 0);
    assert_eq!(built.defects, 1);
    assert!(h.store.find_job("V1", Milestone::Register).await.unwrap().is_none());

    // re-running the builder does not pile up issues
    h.pipeline.queue_builder.build_once().await.unwrap();
    let issues = h.pending_issues("V1").await;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].reason, IssueReason::InvalidProviderCode);
}

#[tokio::test]
async fn missing_schedule_blocks_until_revalidated() {
    let h = harness();
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));
    h.pipeline.poller.poll(Milestone::Register).await.unwrap();

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert_eq!(visit.progress.status_kind(Milestone::Register), Some(StatusKind::Blocked));
    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.registrations_queued, 0);

    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    let report = h.pipeline.admin.revalidate_blocked(10).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.now_ready, 1);

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert_eq!(visit.progress.status_kind(Milestone::Register), Some(StatusKind::Ready));
    assert_eq!(visit.snapshot.practice_hours.as_deref(), Some("08:00-12:00"));
    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.registrations_queued, 1);
}

#[tokio::test]
async fn incomplete_registration_is_blocked() {
    let h = harness();
    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    let mut row = registration("V1", "ANA", "33690", at(8, 5));
    row.queue_number = String::new();
    h.source.push_registration(row);
    h.pipeline.poller.poll(Milestone::Register).await.unwrap();

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    let entry = visit.progress.get(Milestone::Register).unwrap();
    let crate::domain::TaskStatus::Blocked { blocked_reason } = &entry.status else {
        panic!("expected blocked, got {:?}", entry.status);
    };
    assert!(blocked_reason.contains("incomplete registration"));
}

#[tokio::test]
async fn future_visits_are_skipped_but_the_cursor_moves() {
    let h = harness();
    let mut row = registration("V9", "ANA", "33690", at(8, 5));
    row.visit_date = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
    h.source.push_registration(row);

    let report = h.pipeline.poller.poll(Milestone::Register).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(h.store.get_visit("V9").await.unwrap().is_none());
    let wm = h.store.load_watermark(Milestone::Register).await.unwrap().unwrap();
    assert_eq!(
        wm.committed_cursor,
        NaiveDate::from_ymd_opt(2026, 1, 25).unwrap().and_time(at(8, 5))
    );
}

#[tokio::test]
async fn polling_the_same_window_twice_changes_nothing() {
    let h = harness();
    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));
    h.source.push_registration(registration("V2", "ANA", "33690", at(8, 9)));
    h.source.push_milestone(Milestone::CheckIn, milestone_row("V1", at(8, 30)));

    let first = h.pipeline.poller.poll_all().await;
    assert_eq!(first.len(), 6);
    let watermarks = h.store.list_watermarks().await.unwrap();
    let v1 = h.store.get_visit("V1").await.unwrap().unwrap();

    for wm in &watermarks {
        assert!(wm.pending_cursor.is_none());
    }
    let register_wm = watermarks
        .iter()
        .find(|w| w.stream == Milestone::Register)
        .unwrap();
    assert_eq!(register_wm.committed_cursor, day().and_time(at(8, 9)));

    let second = h.pipeline.poller.poll_all().await;
    assert!(second.iter().all(|r| r.fetched == 0 && r.applied == 0));
    assert_eq!(h.store.list_watermarks().await.unwrap(), watermarks);
    assert_eq!(h.store.get_visit("V1").await.unwrap().unwrap(), v1);
}

#[tokio::test]
async fn milestone_for_unknown_visit_is_skipped() {
    let h = harness();
    h.source.push_milestone(Milestone::CheckIn, milestone_row("GHOST", at(9, 0)));

    let report = h.pipeline.poller.poll(Milestone::CheckIn).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.committed_cursor, Some(day().and_time(at(9, 0))));
    assert!(h.pending_issues("GHOST").await.is_empty());
}

#[tokio::test]
async fn source_outage_rolls_back_and_resumes() {
    let h = harness();
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));
    h.source.set_unavailable(true);

    let err = h.pipeline.poller.poll(Milestone::Register).await.unwrap_err();
    assert_eq!(err.kind(), crate::domain::ErrorKind::Transient);
    assert!(h.store.get_visit("V1").await.unwrap().is_none());

    h.source.set_unavailable(false);
    let report = h.pipeline.poller.poll(Milestone::Register).await.unwrap();
    assert_eq!(report.applied, 1);
}

#[tokio::test]
async fn failed_commit_rolls_back_to_the_committed_cursor() {
    let h = flaky_watermark_harness(1);
    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));
    h.source.push_registration(registration("V2", "ANA", "33690", at(8, 9)));
    let initial = h.pipeline.config.poll.initial_cursor;

    // 行の処理と pending の保存までは成功し、commit の保存で落ちる
    let err = h.pipeline.poller.poll(Milestone::Register).await.unwrap_err();
    assert_eq!(err.kind(), crate::domain::ErrorKind::Infrastructure);
    let wm = h.store.load_watermark(Milestone::Register).await.unwrap().unwrap();
    assert_eq!(wm.pending_cursor, None);
    assert_eq!(wm.committed_cursor, initial);

    let report = h.pipeline.poller.poll(Milestone::Register).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.committed_cursor, Some(day().and_time(at(8, 9))));

    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.registrations_queued, 2);
    assert_eq!(h.store.queue_stats().await.unwrap().pending, 2);
}

#[tokio::test]
async fn saved_pending_cursor_is_committed_on_the_next_poll() {
    // commit も rollback も保存できず、pending が残ったままになる
    let h = flaky_watermark_harness(2);
    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));
    let initial = h.pipeline.config.poll.initial_cursor;

    assert!(h.pipeline.poller.poll(Milestone::Register).await.is_err());
    let wm = h.store.load_watermark(Milestone::Register).await.unwrap().unwrap();
    assert_eq!(wm.pending_cursor, Some(day().and_time(at(8, 5))));
    assert_eq!(wm.committed_cursor, initial);

    let report = h.pipeline.poller.poll(Milestone::Register).await.unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(report.committed_cursor, Some(day().and_time(at(8, 5))));
    let wm = h.store.load_watermark(Milestone::Register).await.unwrap().unwrap();
    assert_eq!(wm.pending_cursor, None);
    assert_eq!(wm.committed_cursor, day().and_time(at(8, 5)));
    assert!(h.store.get_visit("V1").await.unwrap().is_some());
}

#[tokio::test]
async fn concurrent_stream_polls_keep_both_milestones() {
    let h = interleaving_harness();
    h.registered_visit().await;
    h.source.push_milestone(Milestone::CheckIn, milestone_row("V1", at(8, 30)));
    h.source.push_milestone(Milestone::ServiceStart, milestone_row("V1", at(8, 45)));

    let poller = &h.pipeline.poller;
    let (check_in, service_start) = tokio::join!(
        poller.poll(Milestone::CheckIn),
        poller.poll(Milestone::ServiceStart)
    );
    assert_eq!(check_in.unwrap().applied, 1);
    assert_eq!(service_start.unwrap().applied, 1);

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert_eq!(visit.progress.status_kind(Milestone::CheckIn), Some(StatusKind::Draft));
    assert_eq!(visit.progress.status_kind(Milestone::ServiceStart), Some(StatusKind::Draft));
}

#[tokio::test]
async fn poll_during_dispatch_keeps_the_sent_milestone() {
    let h = interleaving_harness();
    h.registered_visit().await;
    h.source.push_milestone(Milestone::CheckIn, milestone_row("V1", at(8, 30)));
    h.pipeline.poller.poll(Milestone::CheckIn).await.unwrap();
    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.milestones_queued, 1);
    h.source.push_milestone(Milestone::ServiceStart, milestone_row("V1", at(8, 45)));

    let (polled, dispatched) = tokio::join!(
        h.pipeline.poller.poll(Milestone::ServiceStart),
        h.pipeline.worker.process_next()
    );
    assert_eq!(polled.unwrap().applied, 1);
    assert!(matches!(dispatched.unwrap(), DispatchOutcome::Sent { .. }));

    let job = h.store.find_job("V1", Milestone::CheckIn).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Sent);
    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert_eq!(visit.progress.status_kind(Milestone::CheckIn), Some(StatusKind::Sent));
    assert_eq!(visit.progress.status_kind(Milestone::ServiceStart), Some(StatusKind::Draft));
}

#[tokio::test]
async fn out_of_order_milestone_raises_one_issue_until_cleared() {
    let h = harness();
    h.registered_visit().await;

    h.source.push_milestone(Milestone::CheckIn, milestone_row("V1", at(8, 30)));
    h.source
        .push_milestone(Milestone::ServiceStart, milestone_row("V1", at(8, 40)));
    h.pipeline.poller.poll(Milestone::CheckIn).await.unwrap();
    h.pipeline.poller.poll(Milestone::ServiceStart).await.unwrap();

    let issues = h.pending_issues("V1").await;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].milestone, Milestone::ServiceStart);
    assert_eq!(issues[0].missing, Some(Milestone::CheckIn));
    assert_eq!(issues[0].reason, IssueReason::StartCheckinNotSent);

    // check-in is queued, service start waits for it to be SENT
    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.milestones_queued, 1);
    assert_eq!(built.deferred, 1);
    assert!(h.store.find_job("V1", Milestone::ServiceStart).await.unwrap().is_none());
    assert_eq!(h.pending_issues("V1").await.len(), 1);

    h.pipeline.worker.process_next().await.unwrap();
    let built = h.pipeline.queue_builder.build_once().await.unwrap();
    assert_eq!(built.milestones_queued, 1);
    assert!(h.pending_issues("V1").await.is_empty());

    let job = h
        .store
        .find_job("V1", Milestone::ServiceStart)
        .await
        .unwrap()
        .unwrap();
    let crate::domain::JobPayload::MilestoneUpdate(payload) = &job.payload else {
        panic!("expected an update payload");
    };
    assert_eq!(payload.taskid, 4);
    let expected = Utc.with_ymd_and_hms(2026, 1, 24, 1, 40, 0).unwrap();
    assert_eq!(payload.waktu, expected.timestamp_millis());
}

#[tokio::test]
async fn one_job_per_visit_and_milestone() {
    let h = harness();
    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));
    h.pipeline.poller.poll(Milestone::Register).await.unwrap();

    assert_eq!(h.pipeline.queue_builder.build_once().await.unwrap().registrations_queued, 1);
    assert_eq!(h.pipeline.queue_builder.build_once().await.unwrap().registrations_queued, 0);
    assert_eq!(h.store.queue_stats().await.unwrap().pending, 1);

    // deleting the stuck job lets the builder queue it again
    assert_eq!(h.pipeline.admin.delete_stuck_jobs("V1").await.unwrap(), 1);
    assert_eq!(h.pipeline.queue_builder.build_once().await.unwrap().registrations_queued, 1);
    assert_eq!(h.store.queue_stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn accepted_registration_is_recorded_on_the_visit() {
    let h = harness();
    h.registered_visit().await;

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert!(visit.progress.is_sent(Milestone::Register));
    assert!(visit.registered_at.is_some());

    let calls = h.authority.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body["kodebooking"], "V1");
    assert_eq!(calls[0].body["kodedokter"], 33690);
    assert_eq!(calls[0].body["jampraktek"], "08:00-12:00");

    let err = h.pipeline.admin.revalidate_visit("V1").await.unwrap_err();
    assert!(matches!(err, crate::domain::SyncError::InvalidState(_)));
}

#[tokio::test]
async fn manual_refresh_reports_each_pair() {
    let h = harness();
    h.authority.set_schedules(
        "ANA",
        day(),
        vec![AuthoritySchedule {
            clinic_id: "ANA".into(),
            clinic_name: Some("Anak".into()),
            provider_code: 33690,
            provider_name: Some("dr. Sari".into()),
            hours: "08:00-12:00".into(),
            capacity: 30,
            day_off: 0,
        }],
    );
    let next = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();

    let results = h
        .pipeline
        .admin
        .refresh_schedules(&["ANA".to_string()], &[day(), next])
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].written, Some(1));
    assert_eq!(results[1].written, Some(0));

    let schedule = h.store.find_schedule("ANA", "33690", day()).await.unwrap().unwrap();
    assert_eq!(schedule.source, ScheduleSource::AuthoritySync);
    assert_eq!(schedule.quota, 30);
    assert_eq!(h.pipeline.status.refresh_cache_stats().total, 0);
}

#[tokio::test]
async fn status_report_covers_every_stream() {
    let h = harness();
    h.registered_visit().await;
    h.source.push_milestone(Milestone::ServiceStart, milestone_row("V1", at(8, 40)));
    h.pipeline.poller.poll_all().await;

    let report = h.pipeline.status.report(100).await.unwrap();
    assert_eq!(report.watermarks.len(), 6);
    assert_eq!(report.queue.sent, 1);
    assert_eq!(report.visits_with_pending_issues, 1);

    let progress = h.pipeline.status.visit_progress("V1").await.unwrap().unwrap();
    assert!(progress.registered_at.is_some());
    let sent = h.pipeline.status.jobs_with_status(JobStatus::Sent, 10).await.unwrap();
    assert_eq!(sent.len(), 1);
    let attempts = h.pipeline.status.attempts_for_job(sent[0].job_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
}

#[tokio::test]
async fn periodic_tasks_drive_a_visit_to_the_authority() {
    let mut config = SyncConfig::default();
    config.poll.interval = Duration::from_millis(10);
    config.queue.build_interval = Duration::from_millis(10);
    config.queue.dispatch_interval = Duration::from_millis(10);
    let h = harness_with(config);
    h.source.push_weekday_schedule(weekday("ANA", "33690"));
    h.source.push_registration(registration("V1", "ANA", "33690", at(8, 5)));

    let group = h.pipeline.start();
    assert_eq!(group.len(), 10);
    tokio::time::sleep(Duration::from_millis(300)).await;
    group.shutdown_and_join().await;

    let visit = h.store.get_visit("V1").await.unwrap().unwrap();
    assert!(visit.progress.is_sent(Milestone::Register));
}
