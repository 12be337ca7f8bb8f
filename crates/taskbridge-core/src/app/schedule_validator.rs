//! Schedule Validator - 診療枠の存在確認
//!
//! # フロー
//! 1. (clinic, provider, date) のスナップショットを探す
//! 2. 無ければ病院側の曜日別テーブルから取得（auto-fetch）して保存し、再検索
//! 3. それでも無ければ BLOCKED（対応表の不足を理由に書く）
//!
//! auto-fetch は既存の枠を上書きしない。保険者からの同期（refresh）だけが上書きする。

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};

use crate::domain::{DayName, ScheduleSnapshot, ScheduleSource, SyncError};
use crate::ports::{Clock, HospitalSource, ScheduleStore, WeekdaySchedule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleCheck {
    Valid(ScheduleSnapshot),
    Blocked { reason: String },
}

/// 曜日別テーブルの空欄を埋める既定値
#[derive(Debug, Clone, Copy)]
pub struct AutoFetchDefaults {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub quota: u32,
}

pub struct ScheduleValidator {
    source: Arc<dyn HospitalSource>,
    schedules: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
    defaults: AutoFetchDefaults,
}

impl ScheduleValidator {
    pub fn new(
        source: Arc<dyn HospitalSource>,
        schedules: Arc<dyn ScheduleStore>,
        clock: Arc<dyn Clock>,
        defaults: AutoFetchDefaults,
    ) -> Self {
        Self {
            source,
            schedules,
            clock,
            defaults,
        }
    }

    pub async fn validate(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<ScheduleCheck, SyncError> {
        if let Some(found) = self.schedules.find_schedule(clinic_id, provider_id, date).await? {
            return Ok(ScheduleCheck::Valid(found));
        }

        let day = DayName::of(date);
        let inserted = self.auto_fetch(clinic_id, provider_id, date, day).await?;
        if inserted > 0 {
            info!(clinic_id, provider_id, %date, %day, inserted, "schedule auto-fetched");
        }

        match self.schedules.find_schedule(clinic_id, provider_id, date).await? {
            Some(found) => Ok(ScheduleCheck::Valid(found)),
            None => Ok(ScheduleCheck::Blocked {
                reason: format!(
                    "no {day} schedule for clinic {clinic_id} provider {provider_id}: \
                     missing entry in clinic/provider-to-authority mapping tables"
                ),
            }),
        }
    }

    async fn auto_fetch(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
        day: DayName,
    ) -> Result<usize, SyncError> {
        let rows = self
            .source
            .weekday_schedules(clinic_id, provider_id, day)
            .await?;
        debug!(clinic_id, provider_id, %day, rows = rows.len(), "weekday schedules");

        let mut inserted = 0;
        for row in rows {
            let snapshot = self.snapshot_from(row, date);
            if self.schedules.insert_schedule_if_absent(snapshot).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn snapshot_from(&self, row: WeekdaySchedule, date: NaiveDate) -> ScheduleSnapshot {
        ScheduleSnapshot {
            clinic_id: row.clinic_id,
            provider_id: row.provider_id,
            date,
            start_time: row.start_time.unwrap_or(self.defaults.start),
            end_time: row.end_time.unwrap_or(self.defaults.end),
            quota: row.quota.unwrap_or(self.defaults.quota),
            clinic_name: row.clinic_name,
            provider_name: row.provider_name,
            source: ScheduleSource::AutoFetch,
            updated_at: self.clock.now(),
        }
    }
}
