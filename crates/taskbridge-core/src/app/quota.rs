//! Quota Aggregator - 残り枠の計算
//!
//! # フロー
//! 1. (clinic, provider, date) のスナップショットを読む
//! 2. 無ければ refresh lock を確認
//!    - 別の呼び出しが refresh 中: 最大 `refresh_wait_timeout` だけ待って再読込
//!    - 直近で失敗: refresh せず ±N 日の既知スナップショットにフォールバック
//!    - それ以外: バックグラウンドで保険者から refresh を起動し、フォールバック
//! 3. 競合する登録数を病院側から数えて残り枠を出す
//!
//! フォールバックも無ければ `None`。

use std::sync::Arc;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::refresh_cache::{RefreshGate, RefreshKey, RefreshLocks};
use crate::config::ScheduleConfig;
use crate::domain::schedule::parse_practice_hours;
use crate::domain::{ScheduleSnapshot, ScheduleSource, SyncError};
use crate::ports::{AuthorityApi, AuthoritySchedule, Clock, HospitalSource, ScheduleStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub capacity: u32,
    pub remaining: u32,
    pub non_insured_capacity: u32,
    pub non_insured_remaining: u32,
    /// `HH:MM-HH:MM` 形式
    pub practice_hours: String,
    pub start_time: NaiveTime,
    pub competing: u32,
    /// 要求日ではなく近い日付の枠から算出した値
    pub stale: bool,
    pub schedule: ScheduleSnapshot,
}

/// `queue_seq` 番目の患者の推定診察時刻（epoch ミリ秒）
///
/// 診療開始時刻 + 受付順 × 1 枠分。時刻は病院のオフセットで解釈する。
pub fn estimated_service_ms(
    date: NaiveDate,
    start: NaiveTime,
    queue_seq: u32,
    minutes_per_slot: u32,
    offset: FixedOffset,
) -> Option<i64> {
    let minutes = i64::from(queue_seq) * i64::from(minutes_per_slot);
    let local = date.and_time(start).checked_add_signed(Duration::minutes(minutes))?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|at| at.timestamp_millis())
}

/// 保険者から診療科・日付単位の診療枠を取得して upsert する
#[derive(Clone)]
pub struct ScheduleRefresher {
    authority: Arc<dyn AuthorityApi>,
    schedules: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
}

impl ScheduleRefresher {
    pub fn new(
        authority: Arc<dyn AuthorityApi>,
        schedules: Arc<dyn ScheduleStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            authority,
            schedules,
            clock,
        }
    }

    /// 書き込んだスナップショット数を返す
    pub async fn refresh(&self, clinic_id: &str, date: NaiveDate) -> Result<usize, SyncError> {
        let published = self.authority.fetch_schedules(clinic_id, date).await?;
        if published.is_empty() {
            warn!(clinic_id, %date, "authority published no schedules");
            return Ok(0);
        }

        let mut written = 0;
        for schedule in published {
            let Some(snapshot) = self.snapshot_from(schedule, date) else {
                continue;
            };
            self.schedules.upsert_schedule(snapshot).await?;
            written += 1;
        }
        info!(clinic_id, %date, written, "schedules refreshed");
        Ok(written)
    }

    fn snapshot_from(&self, schedule: AuthoritySchedule, date: NaiveDate) -> Option<ScheduleSnapshot> {
        if schedule.day_off != 0 {
            debug!(provider = schedule.provider_code, %date, "provider off");
            return None;
        }
        let Some((start_time, end_time)) = parse_practice_hours(&schedule.hours) else {
            warn!(provider = schedule.provider_code, hours = %schedule.hours, "unparsable practice hours");
            return None;
        };
        Some(ScheduleSnapshot {
            clinic_id: schedule.clinic_id,
            provider_id: schedule.provider_code.to_string(),
            date,
            start_time,
            end_time,
            quota: schedule.capacity,
            clinic_name: schedule.clinic_name,
            provider_name: schedule.provider_name,
            source: ScheduleSource::AuthoritySync,
            updated_at: self.clock.now(),
        })
    }
}

pub struct QuotaAggregator {
    source: Arc<dyn HospitalSource>,
    schedules: Arc<dyn ScheduleStore>,
    refresher: ScheduleRefresher,
    locks: Arc<RefreshLocks>,
    cfg: ScheduleConfig,
}

impl QuotaAggregator {
    pub fn new(
        source: Arc<dyn HospitalSource>,
        schedules: Arc<dyn ScheduleStore>,
        refresher: ScheduleRefresher,
        locks: Arc<RefreshLocks>,
        cfg: ScheduleConfig,
    ) -> Self {
        Self {
            source,
            schedules,
            refresher,
            locks,
            cfg,
        }
    }

    pub async fn calculate(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<Option<QuotaInfo>, SyncError> {
        let found = self.schedules.find_schedule(clinic_id, provider_id, date).await?;
        let (schedule, stale) = match found {
            Some(schedule) => (schedule, false),
            None => match self.resolve_missing(clinic_id, provider_id, date).await? {
                Some(resolved) => resolved,
                None => {
                    warn!(clinic_id, provider_id, %date, "no schedule and no fallback");
                    return Ok(None);
                }
            },
        };

        let competing = self
            .source
            .count_registrations(clinic_id, provider_id, date)
            .await?;
        Ok(Some(self.figures(schedule, competing, stale)))
    }

    fn figures(&self, schedule: ScheduleSnapshot, competing: u32, stale: bool) -> QuotaInfo {
        let capacity = schedule.quota;
        let non_insured_capacity =
            (f64::from(capacity) * self.cfg.non_insured_quota_ratio).floor().max(0.0) as u32;
        QuotaInfo {
            capacity,
            remaining: capacity.saturating_sub(competing),
            non_insured_capacity,
            non_insured_remaining: non_insured_capacity.saturating_sub(competing),
            practice_hours: schedule.practice_hours(),
            start_time: schedule.start_time,
            competing,
            stale,
            schedule,
        }
    }

    async fn resolve_missing(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(ScheduleSnapshot, bool)>, SyncError> {
        let key: RefreshKey = (clinic_id.to_string(), date);
        match self.locks.try_acquire(&key) {
            RefreshGate::InFlight => {
                debug!(clinic_id, %date, "refresh in flight, waiting");
                if let Some(found) = self.wait_for_refresh(&key, provider_id).await? {
                    return Ok(Some((found, false)));
                }
            }
            RefreshGate::CircuitOpen { last_error } => {
                warn!(clinic_id, %date, last_error = %last_error, "circuit open, using last known schedule");
            }
            RefreshGate::Acquired => {
                info!(clinic_id, %date, "schedule missing, refreshing in background");
                self.spawn_refresh(key);
            }
        }

        let nearest = self
            .schedules
            .nearest_schedule(clinic_id, provider_id, date, self.cfg.fallback_window_days)
            .await?;
        Ok(nearest.map(|s| (s.redated(date), true)))
    }

    async fn wait_for_refresh(
        &self,
        key: &RefreshKey,
        provider_id: &str,
    ) -> Result<Option<ScheduleSnapshot>, SyncError> {
        let deadline = Instant::now() + self.cfg.refresh_wait_timeout;
        loop {
            sleep(self.cfg.refresh_wait_poll).await;
            let found = self.schedules.find_schedule(&key.0, provider_id, key.1).await?;
            if found.is_some() {
                return Ok(found);
            }
            if !self.locks.is_refreshing(key) || Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn spawn_refresh(&self, key: RefreshKey) {
        let refresher = self.refresher.clone();
        let locks = Arc::clone(&self.locks);
        tokio::spawn(async move {
            match refresher.refresh(&key.0, key.1).await {
                Ok(_) => locks.complete(&key),
                Err(e) => {
                    warn!(clinic_id = %key.0, date = %key.1, error = %e, "background refresh failed");
                    locks.fail(&key, e.to_string());
                }
            }
        });
    }
}
