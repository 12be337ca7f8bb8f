//! HospitalSource port - 病院情報システム（読み取り専用）
//!
//! マイルストーンは各テーブルの日付列・時刻列として存在し、プッシュ通知はない。
//! そのため「カーソル以降の行を昇順で N 件」という取得だけを要求します。

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DayName, Milestone};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("malformed row: {0}")]
    Malformed(String),
}

/// 病院システム上の受付 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRow {
    pub visit_id: String,
    pub clinic_id: String,
    pub provider_id: String,
    pub visit_date: NaiveDate,
    pub registered_time: NaiveTime,
    pub queue_number: String,
    #[serde(default)]
    pub insured: bool,
    #[serde(default)]
    pub medical_record_no: Option<String>,
    #[serde(default)]
    pub visit_type: Option<u8>,
}

impl RegisterRow {
    /// 日付と時刻をそのまま合成する（タイムゾーン変換なし）
    pub fn event_time(&self) -> NaiveDateTime {
        self.visit_date.and_time(self.registered_time)
    }
}

/// 既存の Visit に対する後続マイルストーン
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRow {
    pub visit_id: String,
    pub event_date: NaiveDate,
    pub event_time: NaiveTime,
}

impl MilestoneRow {
    pub fn event_time(&self) -> NaiveDateTime {
        self.event_date.and_time(self.event_time)
    }
}

/// 病院側の曜日別診療枠（保険者コードへの対応表と結合済み）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdaySchedule {
    pub clinic_id: String,
    pub provider_id: String,
    pub day: DayName,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub quota: Option<u32>,
    #[serde(default)]
    pub clinic_name: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
}

#[async_trait]
pub trait HospitalSource: Send + Sync {
    /// `cursor` より後の受付を昇順で最大 `limit` 件
    async fn register_rows_after(
        &self,
        cursor: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<RegisterRow>, SourceError>;

    /// 受付以外のマイルストーンの行を `cursor` より後から昇順で最大 `limit` 件
    async fn milestone_rows_after(
        &self,
        milestone: Milestone,
        cursor: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<MilestoneRow>, SourceError>;

    /// 同じ医師枠を取り合う受付
    async fn count_registrations(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<u32, SourceError>;

    /// 対応表に行が無ければ空
    async fn weekday_schedules(
        &self,
        clinic_id: &str,
        provider_id: &str,
        day: DayName,
    ) -> Result<Vec<WeekdaySchedule>, SourceError>;
}
