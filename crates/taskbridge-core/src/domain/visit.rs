use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::milestone::Milestone;
use super::progress::{Admission, TaskProgress, TransitionError};

/// Figures frozen at registration time, so later payloads do not drift
/// when schedules or counts change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSnapshot {
    /// `HH:MM-HH:MM`, if a schedule was known.
    pub practice_hours: Option<String>,
    pub capacity: u32,
    pub remaining: u32,
    pub non_insured_capacity: u32,
    pub non_insured_remaining: u32,
    /// Epoch milliseconds.
    pub estimated_service_ms: Option<i64>,
    pub clinic_name: Option<String>,
    pub provider_name: Option<String>,
    pub medical_record_no: Option<String>,
    pub visit_type: u8,
}

/// One patient encounter, keyed by the hospital's visit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub visit_id: String,
    pub clinic_id: String,
    pub provider_id: String,
    pub visit_date: NaiveDate,
    pub queue_number: String,
    pub queue_seq: u32,
    pub insured: bool,
    pub progress: TaskProgress,
    pub snapshot: PayloadSnapshot,
    /// Set when the authority accepts the registration.
    pub registered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 1 マイルストーン分の progress 変更。store のロック内で最新の Visit に適用する。
///
/// progress 全体を読み書きすると、並行する poller / dispatch が互いの更新を
/// 上書きしてしまうため、変更は必ずこの単位で渡す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressChange {
    /// Registration admission. `snapshot` replaces the frozen figures when set.
    Admit {
        admission: Admission,
        event_time: Option<NaiveDateTime>,
        snapshot: Option<PayloadSnapshot>,
    },
    RecordEvent {
        milestone: Milestone,
        event_time: NaiveDateTime,
    },
    /// Accepted by the authority. A SENT registration also stamps `registered_at`.
    MarkSent {
        milestone: Milestone,
        sent_at: DateTime<Utc>,
    },
    MarkFailed {
        milestone: Milestone,
        reason: String,
    },
}

/// What applying a [`ProgressChange`] did to the stored visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Written. Carries the visit as stored afterwards.
    Applied(Visit),
    /// Nothing to write (e.g. the milestone already moved past DRAFT).
    Unchanged(Visit),
    Rejected(TransitionError),
}

impl Visit {
    /// Apply `change` in place. `Ok(false)` means the visit is unchanged.
    /// On error the visit is left untouched.
    pub fn apply(&mut self, change: ProgressChange) -> Result<bool, TransitionError> {
        match change {
            ProgressChange::Admit {
                admission,
                event_time,
                snapshot,
            } => {
                self.progress.admit(admission, event_time)?;
                if let Some(snapshot) = snapshot {
                    self.snapshot = snapshot;
                }
                Ok(true)
            }
            ProgressChange::RecordEvent {
                milestone,
                event_time,
            } => self.progress.record_event(milestone, event_time),
            ProgressChange::MarkSent { milestone, sent_at } => {
                self.progress.mark_sent(milestone, sent_at)?;
                if milestone.is_register() {
                    self.registered_at = Some(sent_at);
                }
                Ok(true)
            }
            ProgressChange::MarkFailed { milestone, reason } => {
                self.progress.mark_failed(milestone, reason)?;
                Ok(true)
            }
        }
    }
}

/// Numeric part of a queue number ("A-012" -> 12). Non-numeric numbers map to 0.
pub fn queue_sequence(queue_number: &str) -> u32 {
    let digits: String = queue_number
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn visit() -> Visit {
        let at = Utc.with_ymd_and_hms(2026, 1, 24, 3, 0, 0).unwrap();
        Visit {
            visit_id: "V1".into(),
            clinic_id: "ANA".into(),
            provider_id: "33690".into(),
            visit_date: NaiveDate::from_ymd_opt(2026, 1, 24).unwrap(),
            queue_number: "A-001".into(),
            queue_seq: 1,
            insured: true,
            progress: TaskProgress::new(),
            snapshot: PayloadSnapshot::default(),
            registered_at: None,
            created_at: at,
        }
    }

    fn event_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 24)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[rstest]
    #[case::plain("007", 7)]
    #[case::prefixed("A-012", 12)]
    #[case::empty("", 0)]
    #[case::letters("ABC", 0)]
    fn queue_sequence_extracts_leading_digits(#[case] raw: &str, #[case] expected: u32) {
        assert_eq!(queue_sequence(raw), expected);
    }

    #[test]
    fn sent_registration_stamps_registered_at() {
        let mut v = visit();
        let admit = ProgressChange::Admit {
            admission: Admission::Ready,
            event_time: Some(event_time()),
            snapshot: None,
        };
        assert_eq!(v.apply(admit), Ok(true));

        let sent_at = Utc.with_ymd_and_hms(2026, 1, 24, 3, 5, 0).unwrap();
        let change = ProgressChange::MarkSent {
            milestone: Milestone::Register,
            sent_at,
        };
        assert_eq!(v.apply(change), Ok(true));
        assert_eq!(v.registered_at, Some(sent_at));
    }

    #[test]
    fn admit_with_snapshot_replaces_frozen_figures() {
        let mut v = visit();
        let snapshot = PayloadSnapshot {
            capacity: 20,
            remaining: 19,
            ..PayloadSnapshot::default()
        };
        let change = ProgressChange::Admit {
            admission: Admission::Ready,
            event_time: None,
            snapshot: Some(snapshot.clone()),
        };
        assert_eq!(v.apply(change), Ok(true));
        assert_eq!(v.snapshot, snapshot);
    }

    #[test]
    fn rejected_change_leaves_visit_untouched() {
        let mut v = visit();
        let before = v.clone();
        let change = ProgressChange::MarkSent {
            milestone: Milestone::CheckIn,
            sent_at: v.created_at,
        };
        assert!(v.apply(change).is_err());
        assert_eq!(v, before);
    }
}
