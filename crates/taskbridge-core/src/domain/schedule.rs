//! Practice schedules cached from the authority or the hospital system.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleSource {
    /// Synced from the authority's schedule endpoint.
    AuthoritySync,
    /// Looked up on demand in the hospital system's weekday tables.
    AutoFetch,
    /// Seeded by an operator.
    Manual,
}

/// One practice session of a provider at a clinic on a date.
///
/// Unique on (clinic, provider, date, start_time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub clinic_id: String,
    pub provider_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub quota: u32,
    pub clinic_name: Option<String>,
    pub provider_name: Option<String>,
    pub source: ScheduleSource,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleSnapshot {
    /// Formatted as the authority expects, e.g. `08:00-12:00`.
    pub fn practice_hours(&self) -> String {
        format_practice_hours(self.start_time, self.end_time)
    }

    pub fn same_slot(&self, other: &ScheduleSnapshot) -> bool {
        self.clinic_id == other.clinic_id
            && self.provider_id == other.provider_id
            && self.date == other.date
            && self.start_time == other.start_time
    }

    /// Copy of this snapshot presented for another date (stale fallback).
    pub fn redated(&self, date: NaiveDate) -> Self {
        Self {
            date,
            ..self.clone()
        }
    }
}

pub fn format_practice_hours(start: NaiveTime, end: NaiveTime) -> String {
    format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"))
}

/// Parse `HH:MM-HH:MM` (seconds tolerated on either side).
pub fn parse_practice_hours(raw: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = raw.split_once('-')?;
    Some((parse_clock(start.trim())?, parse_clock(end.trim())?))
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Day names used by the hospital system's schedule tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayName {
    Minggu,
    Senin,
    Selasa,
    Rabu,
    Kamis,
    Jumat,
    Sabtu,
}

impl DayName {
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sun => DayName::Minggu,
            Weekday::Mon => DayName::Senin,
            Weekday::Tue => DayName::Selasa,
            Weekday::Wed => DayName::Rabu,
            Weekday::Thu => DayName::Kamis,
            Weekday::Fri => DayName::Jumat,
            Weekday::Sat => DayName::Sabtu,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DayName::Minggu => "MINGGU",
            DayName::Senin => "SENIN",
            DayName::Selasa => "SELASA",
            DayName::Rabu => "RABU",
            DayName::Kamis => "KAMIS",
            DayName::Jumat => "JUMAT",
            DayName::Sabtu => "SABTU",
        }
    }
}

impl fmt::Display for DayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::saturday(24, DayName::Sabtu)]
    #[case::sunday(25, DayName::Minggu)]
    #[case::monday(26, DayName::Senin)]
    #[case::friday(30, DayName::Jumat)]
    fn day_names_follow_the_calendar(#[case] day: u32, #[case] expected: DayName) {
        let date = NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        assert_eq!(DayName::of(date), expected);
    }

    #[rstest]
    #[case::short("08:00-12:00", Some(("08:00", "12:00")))]
    #[case::with_seconds("13:30:00 - 16:00:00", Some(("13:30", "16:00")))]
    #[case::garbage("pagi", None)]
    #[case::half("08:00-", None)]
    fn practice_hours_parse(#[case] raw: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_practice_hours(raw)
            .map(|(s, e)| (s.format("%H:%M").to_string(), e.format("%H:%M").to_string()));
        let expected = expected.map(|(s, e)| (s.to_string(), e.to_string()));
        assert_eq!(parsed, expected);
    }
}
