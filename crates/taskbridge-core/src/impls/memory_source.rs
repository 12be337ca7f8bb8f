//! In-memory hospital source.
//!
//! 開発・テスト用。JSON フィクスチャから読み込めるので、CLI の dry-run でも使う。

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{DayName, Milestone};
use crate::ports::{HospitalSource, MilestoneRow, RegisterRow, SourceError, WeekdaySchedule};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneFixtureRow {
    pub milestone: Milestone,
    #[serde(flatten)]
    pub row: MilestoneRow,
}

/// Tables of the hospital system, as a fixture file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFixture {
    #[serde(default)]
    pub registrations: Vec<RegisterRow>,
    #[serde(default)]
    pub milestones: Vec<MilestoneFixtureRow>,
    #[serde(default)]
    pub weekday_schedules: Vec<WeekdaySchedule>,
}

#[derive(Debug, Default)]
pub struct InMemorySource {
    tables: Mutex<SourceFixture>,
    unavailable: AtomicBool,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: SourceFixture) -> Self {
        Self {
            tables: Mutex::new(fixture),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
        let fixture: SourceFixture = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn push_registration(&self, row: RegisterRow) {
        self.with_tables(|t| t.registrations.push(row));
    }

    pub fn push_milestone(&self, milestone: Milestone, row: MilestoneRow) {
        self.with_tables(|t| t.milestones.push(MilestoneFixtureRow { milestone, row }));
    }

    pub fn push_weekday_schedule(&self, schedule: WeekdaySchedule) {
        self.with_tables(|t| t.weekday_schedules.push(schedule));
    }

    /// Simulate a connectivity failure for every query.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut SourceFixture) -> R) -> R {
        let mut guard = match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

fn after_cursor<T>(
    rows: impl Iterator<Item = T>,
    event_time: impl Fn(&T) -> NaiveDateTime,
    cursor: NaiveDateTime,
    limit: usize,
) -> Vec<T> {
    let mut rows: Vec<T> = rows.filter(|r| event_time(r) > cursor).collect();
    rows.sort_by_key(|r| event_time(r));
    rows.truncate(limit);
    rows
}

#[async_trait]
impl HospitalSource for InMemorySource {
    async fn register_rows_after(
        &self,
        cursor: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<RegisterRow>, SourceError> {
        self.check_available()?;
        Ok(self.with_tables(|t| {
            after_cursor(
                t.registrations.iter().cloned(),
                RegisterRow::event_time,
                cursor,
                limit,
            )
        }))
    }

    async fn milestone_rows_after(
        &self,
        milestone: Milestone,
        cursor: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<MilestoneRow>, SourceError> {
        self.check_available()?;
        Ok(self.with_tables(|t| {
            let rows = t
                .milestones
                .iter()
                .filter(|m| m.milestone == milestone)
                .map(|m| m.row.clone());
            after_cursor(rows, MilestoneRow::event_time, cursor, limit)
        }))
    }

    async fn count_registrations(
        &self,
        clinic_id: &str,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<u32, SourceError> {
        self.check_available()?;
        let count = self.with_tables(|t| {
            t.registrations
                .iter()
                .filter(|r| {
                    r.clinic_id == clinic_id && r.provider_id == provider_id && r.visit_date == date
                })
                .count()
        });
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn weekday_schedules(
        &self,
        clinic_id: &str,
        provider_id: &str,
        day: DayName,
    ) -> Result<Vec<WeekdaySchedule>, SourceError> {
        self.check_available()?;
        Ok(self.with_tables(|t| {
            t.weekday_schedules
                .iter()
                .filter(|s| s.clinic_id == clinic_id && s.provider_id == provider_id && s.day == day)
                .cloned()
                .collect()
        }))
    }
}
