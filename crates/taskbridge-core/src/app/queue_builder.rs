//! Queue Builder - 送信ジョブの生成
//!
//! # 2 パス
//! - REGISTER: progress[1] が READY でジョブの無い Visit から登録ペイロードを作る
//! - マイルストーン (3..7): DRAFT/FAILED でジョブの無い Visit のうち、依存が満たされたものだけ
//!
//! ペイロードが作れない場合（診療時間不明、医師コードが数値でない、時刻なし）は
//! その Visit だけ止めて issue を残す。ジョブの一意性は store が守る。

use std::sync::Arc;

use chrono::{FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::task_validator::TaskValidator;
use crate::domain::payload::ARRIVAL_NOTE;
use crate::domain::{
    DependencyCheck, IssueReason, JobPayload, Milestone, MilestoneUpdatePayload, QueueJob,
    RegistrationPayload, StatusKind, SyncError, Visit,
};
use crate::ports::{Clock, IdGenerator, JobStore, ScheduleStore, StoreError, VisitStore};

const NOT_COLLECTED: &str = "-";
const PATIENT_KIND: &str = "NON JKN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub registrations_queued: usize,
    pub milestones_queued: usize,
    /// 先行マイルストーンが未 SENT のため次回に回した件数
    pub deferred: usize,
    pub defects: usize,
}

/// ペイロードを組み立てられなかった理由
#[derive(Debug, Clone, PartialEq, Eq)]
struct Defect {
    reason: IssueReason,
    message: String,
}

impl Defect {
    fn new(reason: IssueReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

pub struct QueueBuilder {
    visits: Arc<dyn VisitStore>,
    jobs: Arc<dyn JobStore>,
    schedules: Arc<dyn ScheduleStore>,
    task_validator: Arc<TaskValidator>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    limit: usize,
    offset: FixedOffset,
}

impl QueueBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        visits: Arc<dyn VisitStore>,
        jobs: Arc<dyn JobStore>,
        schedules: Arc<dyn ScheduleStore>,
        task_validator: Arc<TaskValidator>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        limit: usize,
        offset: FixedOffset,
    ) -> Self {
        Self {
            visits,
            jobs,
            schedules,
            task_validator,
            ids,
            clock,
            limit,
            offset,
        }
    }

    pub async fn build_once(&self) -> Result<BuildReport, SyncError> {
        let mut report = BuildReport::default();
        self.register_pass(&mut report).await?;
        for milestone in Milestone::UPDATES {
            self.milestone_pass(milestone, &mut report).await?;
        }
        if report != BuildReport::default() {
            info!(
                registrations = report.registrations_queued,
                milestones = report.milestones_queued,
                deferred = report.deferred,
                defects = report.defects,
                "queue built"
            );
        }
        Ok(report)
    }

    async fn register_pass(&self, report: &mut BuildReport) -> Result<(), SyncError> {
        let ready = self
            .visits
            .unqueued_visits(Milestone::Register, &[StatusKind::Ready], self.limit)
            .await?;
        for visit in ready {
            match self.registration_payload(&visit).await? {
                Ok(payload) => {
                    let payload = JobPayload::Registration(payload);
                    if self.enqueue(&visit, Milestone::Register, payload).await? {
                        report.registrations_queued += 1;
                    }
                }
                Err(defect) => {
                    self.report_defect(&visit, Milestone::Register, defect).await?;
                    report.defects += 1;
                }
            }
        }
        Ok(())
    }

    async fn milestone_pass(
        &self,
        milestone: Milestone,
        report: &mut BuildReport,
    ) -> Result<(), SyncError> {
        let candidates = self
            .visits
            .unqueued_visits(milestone, &[StatusKind::Draft, StatusKind::Failed], self.limit)
            .await?;
        for visit in candidates {
            if let DependencyCheck::Unsatisfied { missing } =
                self.task_validator.check(&visit, milestone).await?
            {
                debug!(visit_id = %visit.visit_id, milestone = %milestone, missing = %missing, "deferred");
                report.deferred += 1;
                continue;
            }

            match self.update_payload(&visit, milestone) {
                Ok(payload) => {
                    let payload = JobPayload::MilestoneUpdate(payload);
                    if self.enqueue(&visit, milestone, payload).await? {
                        report.milestones_queued += 1;
                    }
                }
                Err(defect) => {
                    self.report_defect(&visit, milestone, defect).await?;
                    report.defects += 1;
                }
            }
        }
        Ok(())
    }

    /// (visit, milestone) のジョブが既にあれば false
    async fn enqueue(
        &self,
        visit: &Visit,
        milestone: Milestone,
        payload: JobPayload,
    ) -> Result<bool, SyncError> {
        let job = QueueJob::new(
            self.ids.generate_job_id(),
            &visit.visit_id,
            milestone,
            payload,
            self.clock.now(),
        );
        let job_id = job.job_id;
        match self.jobs.insert_job(job).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        debug!(visit_id = %visit.visit_id, milestone = %milestone, job_id = %job_id, "job queued");
        self.task_validator
            .resolve_cleared(&visit.visit_id, milestone)
            .await?;
        Ok(true)
    }

    async fn report_defect(
        &self,
        visit: &Visit,
        milestone: Milestone,
        defect: Defect,
    ) -> Result<(), SyncError> {
        error!(
            visit_id = %visit.visit_id,
            milestone = %milestone,
            reason = %defect.reason,
            "{}", defect.message
        );
        self.task_validator
            .record_defect(&visit.visit_id, milestone, defect.reason, defect.message)
            .await?;
        Ok(())
    }

    async fn registration_payload(
        &self,
        visit: &Visit,
    ) -> Result<Result<RegistrationPayload, Defect>, SyncError> {
        let Ok(provider_code) = visit.provider_id.trim().parse::<u64>() else {
            return Ok(Err(Defect::new(
                IssueReason::InvalidProviderCode,
                format!("provider code {:?} is not numeric", visit.provider_id),
            )));
        };

        let practice_hours = match visit.snapshot.practice_hours.clone() {
            Some(hours) if !hours.trim().is_empty() => Some(hours),
            _ => self
                .schedules
                .find_schedule(&visit.clinic_id, &visit.provider_id, visit.visit_date)
                .await?
                .map(|s| s.practice_hours()),
        };
        let Some(practice_hours) = practice_hours else {
            return Ok(Err(Defect::new(
                IssueReason::PracticeHoursUnresolved,
                format!(
                    "no practice hours for clinic {} provider {} on {}",
                    visit.clinic_id, visit.provider_id, visit.visit_date
                ),
            )));
        };

        let s = &visit.snapshot;
        Ok(Ok(RegistrationPayload {
            kodebooking: visit.visit_id.clone(),
            jenispasien: PATIENT_KIND.into(),
            nomorkartu: NOT_COLLECTED.into(),
            nik: NOT_COLLECTED.into(),
            nohp: NOT_COLLECTED.into(),
            kodepoli: visit.clinic_id.clone(),
            namapoli: s.clinic_name.clone().unwrap_or_default(),
            pasienbaru: 0,
            norm: s
                .medical_record_no
                .clone()
                .unwrap_or_else(|| NOT_COLLECTED.into()),
            tanggalperiksa: visit.visit_date.format("%Y-%m-%d").to_string(),
            kodedokter: provider_code,
            namadokter: s
                .provider_name
                .clone()
                .unwrap_or_else(|| NOT_COLLECTED.into()),
            jampraktek: practice_hours,
            jeniskunjungan: s.visit_type,
            nomorreferensi: String::new(),
            nomorantrean: visit.queue_number.clone(),
            angkaantrean: visit.queue_seq,
            estimasidilayani: s.estimated_service_ms.unwrap_or(0),
            sisakuotajkn: s.remaining,
            kuotajkn: s.capacity,
            sisakuotanonjkn: s.non_insured_remaining,
            kuotanonjkn: s.non_insured_capacity,
            keterangan: ARRIVAL_NOTE.into(),
        }))
    }

    fn update_payload(
        &self,
        visit: &Visit,
        milestone: Milestone,
    ) -> Result<MilestoneUpdatePayload, Defect> {
        let event_time = visit.progress.event_time(milestone).ok_or_else(|| {
            Defect::new(
                IssueReason::MissingEventTime,
                format!("{milestone} has no event time"),
            )
        })?;
        let waktu = self
            .offset
            .from_local_datetime(&event_time)
            .single()
            .map(|at| at.timestamp_millis())
            .ok_or_else(|| {
                Defect::new(
                    IssueReason::MissingEventTime,
                    format!("{milestone} event time {event_time} is not representable"),
                )
            })?;
        Ok(MilestoneUpdatePayload {
            kodebooking: visit.visit_id.clone(),
            taskid: milestone.id(),
            waktu,
        })
    }
}
