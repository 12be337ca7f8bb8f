//! Cursor Poller - 病院側テーブルの取り込み
//!
//! # フロー（ストリームごと）
//! 1. watermark を読む（pending があればそこから再開）
//! 2. カーソルより後の行を昇順で batch_size 件取得
//! 3. 行ごとに処理（REGISTER は Visit 作成、それ以外は DRAFT 記録）
//! 4. バッチ内の最大時刻まで pending を進めて保存
//! 5. commit（pending → committed）して保存
//! 6. 空のバッチが返るまで繰り返す
//!
//! 重複キーは想定内なので握りつぶす。それ以外のエラーはバッチを rollback して返す。
//! 同じ窓を読み直しても結果は変わらない（冪等）。

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::admission::{RegistrationAdmitter, RegistrationKey};
use super::task_validator::TaskValidator;
use crate::config::PollConfig;
use crate::domain::visit::queue_sequence;
use crate::domain::{
    Milestone, PollingWatermark, ProgressChange, ProgressOutcome, SyncError, TaskProgress, Visit,
};
use crate::ports::{
    Clock, HospitalSource, MilestoneRow, RegisterRow, StoreError, VisitStore, WatermarkStore,
};

/// `poll` 1 回分の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    pub stream: Milestone,
    pub batches: u32,
    pub fetched: usize,
    /// 作成した Visit と書き込んだ progress の件数
    pub applied: usize,
    pub skipped: usize,
    pub committed_cursor: Option<NaiveDateTime>,
}

impl PollReport {
    fn new(stream: Milestone) -> Self {
        Self {
            stream,
            batches: 0,
            fetched: 0,
            applied: 0,
            skipped: 0,
            committed_cursor: None,
        }
    }
}

enum RowOutcome {
    Applied,
    Skipped,
}

enum Batch {
    Register(Vec<RegisterRow>),
    Milestone(Vec<MilestoneRow>),
}

impl Batch {
    fn len(&self) -> usize {
        match self {
            Batch::Register(rows) => rows.len(),
            Batch::Milestone(rows) => rows.len(),
        }
    }

    fn max_event_time(&self) -> Option<NaiveDateTime> {
        match self {
            Batch::Register(rows) => rows.iter().map(RegisterRow::event_time).max(),
            Batch::Milestone(rows) => rows.iter().map(MilestoneRow::event_time).max(),
        }
    }
}

pub struct CursorPoller {
    source: Arc<dyn HospitalSource>,
    visits: Arc<dyn VisitStore>,
    watermarks: Arc<dyn WatermarkStore>,
    admitter: Arc<RegistrationAdmitter>,
    task_validator: Arc<TaskValidator>,
    clock: Arc<dyn Clock>,
    cfg: PollConfig,
    offset: FixedOffset,
}

impl CursorPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn HospitalSource>,
        visits: Arc<dyn VisitStore>,
        watermarks: Arc<dyn WatermarkStore>,
        admitter: Arc<RegistrationAdmitter>,
        task_validator: Arc<TaskValidator>,
        clock: Arc<dyn Clock>,
        cfg: PollConfig,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            visits,
            watermarks,
            admitter,
            task_validator,
            clock,
            cfg,
            offset,
        }
    }

    /// 全ストリームをマイルストーン順に poll する
    ///
    /// 失敗したストリームはログを残して committed カーソルのまま。他は続行する。
    pub async fn poll_all(&self) -> Vec<PollReport> {
        let mut reports = Vec::with_capacity(Milestone::ALL.len());
        for stream in Milestone::ALL {
            match self.poll(stream).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(stream = stream.stream(), error = %e, "poll failed"),
            }
        }
        reports
    }

    /// `stream` の取り込めるだけの行を取り込む
    pub async fn poll(&self, stream: Milestone) -> Result<PollReport, SyncError> {
        let mut report = PollReport::new(stream);
        loop {
            let loaded = self.load_watermark(stream).await?;
            let cursor = loaded.cursor();

            let mut watermark = loaded.clone();
            let outcome = self.run_batch(stream, cursor, &mut watermark, &mut report).await;
            match outcome {
                Ok(true) => continue,
                Ok(false) => {
                    report.committed_cursor = Some(watermark.committed_cursor);
                    break;
                }
                Err(e) => {
                    warn!(stream = stream.stream(), %cursor, error = %e, "batch failed, rolling back");
                    // 手元のコピーは commit 済みの可能性があるので、読み込んだ時点から戻す
                    let mut restored = loaded;
                    restored.rollback(self.clock.now());
                    if let Err(save_err) = self.watermarks.save_watermark(&restored).await {
                        warn!(stream = stream.stream(), error = %save_err, "rollback not persisted");
                    }
                    return Err(e);
                }
            }
        }

        if report.fetched > 0 {
            info!(
                stream = stream.stream(),
                batches = report.batches,
                fetched = report.fetched,
                applied = report.applied,
                skipped = report.skipped,
                "stream drained"
            );
        }
        Ok(report)
    }

    async fn load_watermark(&self, stream: Milestone) -> Result<PollingWatermark, SyncError> {
        if let Some(loaded) = self.watermarks.load_watermark(stream).await? {
            return Ok(loaded);
        }
        // 初回は保存しておく（status に全ストリームが出るように）
        let fresh = PollingWatermark::new(stream, self.cfg.initial_cursor, self.clock.now());
        self.watermarks.save_watermark(&fresh).await?;
        Ok(fresh)
    }

    /// 空でないバッチを処理したかどうかを返す
    async fn run_batch(
        &self,
        stream: Milestone,
        cursor: NaiveDateTime,
        watermark: &mut PollingWatermark,
        report: &mut PollReport,
    ) -> Result<bool, SyncError> {
        let batch = self.fetch(stream, cursor).await?;
        let Some(batch_max) = batch.max_event_time() else {
            // 中断されたバッチの pending が残っていれば確定させる
            if watermark.pending_cursor.is_some() {
                watermark.commit(self.clock.now());
                self.watermarks.save_watermark(watermark).await?;
            }
            return Ok(false);
        };
        debug!(stream = stream.stream(), %cursor, rows = batch.len(), "batch fetched");
        report.fetched += batch.len();

        match batch {
            Batch::Register(rows) => {
                let today = self.clock.local_today(self.offset);
                for row in rows {
                    self.count(report, self.ingest_registration(row, today).await?);
                }
            }
            Batch::Milestone(rows) => {
                for row in rows {
                    self.count(report, self.ingest_milestone(stream, row).await?);
                }
            }
        }

        watermark.advance(batch_max, self.clock.now());
        self.watermarks.save_watermark(watermark).await?;
        watermark.commit(self.clock.now());
        self.watermarks.save_watermark(watermark).await?;
        report.batches += 1;
        Ok(true)
    }

    fn count(&self, report: &mut PollReport, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Applied => report.applied += 1,
            RowOutcome::Skipped => report.skipped += 1,
        }
    }

    async fn fetch(&self, stream: Milestone, cursor: NaiveDateTime) -> Result<Batch, SyncError> {
        let limit = self.cfg.batch_size;
        if stream.is_register() {
            let rows = self.source.register_rows_after(cursor, limit).await?;
            Ok(Batch::Register(rows))
        } else {
            let rows = self.source.milestone_rows_after(stream, cursor, limit).await?;
            Ok(Batch::Milestone(rows))
        }
    }

    async fn ingest_registration(
        &self,
        row: RegisterRow,
        today: NaiveDate,
    ) -> Result<RowOutcome, SyncError> {
        if row.visit_id.trim().is_empty() {
            warn!(clinic_id = %row.clinic_id, queue_number = %row.queue_number, "registration without visit id");
            return Ok(RowOutcome::Skipped);
        }
        // 未来日の行は取り込まないが、バッチ最大時刻には含まれるのでカーソルは
        // その日付まで進む。以降に入る当日分の行はカーソルより前になり、取り込まれない。
        if row.visit_date > today {
            debug!(visit_id = %row.visit_id, visit_date = %row.visit_date, "future visit skipped");
            return Ok(RowOutcome::Skipped);
        }
        if self.visits.get_visit(&row.visit_id).await?.is_some() {
            return Ok(RowOutcome::Skipped);
        }

        let assessment = self
            .admitter
            .assess(RegistrationKey {
                clinic_id: &row.clinic_id,
                provider_id: &row.provider_id,
                visit_date: row.visit_date,
                queue_number: &row.queue_number,
            })
            .await?;

        let mut progress = TaskProgress::new();
        progress.admit(assessment.admission.clone(), Some(row.event_time()))?;
        let snapshot = assessment.snapshot(row.medical_record_no.clone(), row.visit_type);

        let visit = Visit {
            queue_seq: queue_sequence(&row.queue_number),
            visit_id: row.visit_id,
            clinic_id: row.clinic_id,
            provider_id: row.provider_id,
            visit_date: row.visit_date,
            queue_number: row.queue_number,
            insured: row.insured,
            progress,
            snapshot,
            registered_at: None,
            created_at: self.clock.now(),
        };
        let visit_id = visit.visit_id.clone();

        match self.visits.insert_visit(visit).await {
            Ok(()) => {
                info!(visit_id = %visit_id, ready = assessment.is_ready(), "visit registered");
                Ok(RowOutcome::Applied)
            }
            Err(StoreError::Duplicate(_)) => Ok(RowOutcome::Skipped),
            Err(e) => Err(e.into()),
        }
    }

    async fn ingest_milestone(
        &self,
        milestone: Milestone,
        row: MilestoneRow,
    ) -> Result<RowOutcome, SyncError> {
        let change = ProgressChange::RecordEvent {
            milestone,
            event_time: row.event_time(),
        };
        let visit = match self.visits.apply_progress(&row.visit_id, change).await {
            Ok(ProgressOutcome::Applied(visit)) => visit,
            Ok(ProgressOutcome::Unchanged(_)) => return Ok(RowOutcome::Skipped),
            Ok(ProgressOutcome::Rejected(e)) => {
                warn!(visit_id = %row.visit_id, error = %e, "milestone not recorded");
                return Ok(RowOutcome::Skipped);
            }
            Err(StoreError::NotFound(_)) => {
                debug!(visit_id = %row.visit_id, milestone = %milestone, "milestone for unknown visit skipped");
                return Ok(RowOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        self.task_validator.check(&visit, milestone).await?;
        Ok(RowOutcome::Applied)
    }
}
