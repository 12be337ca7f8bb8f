//! TaskProgress - 受診ごとのマイルストーン状態表
//!
//! # 設計原則
//! - マイルストーン enum → タグ付き状態 の明示的なマップ
//! - 遷移の可否は `check_transition()` の一箇所だけで判定する
//! - SENT への遷移は依存表（dependency.rs）を必ず通す
//!
//! 永続化形は `{"1": {"status": "SENT", "sent_at": ...}, "3": {...}}` の JSON。

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dependency::{self, DependencyCheck};
use super::milestone::Milestone;

/// Status of one milestone of one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Draft,
    Ready,
    Blocked { blocked_reason: String },
    Sent { sent_at: DateTime<Utc> },
    Failed { failed_reason: String },
}

/// Field-less mirror of [`TaskStatus`], used for queries and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Draft,
    Ready,
    Blocked,
    Sent,
    Failed,
}

impl TaskStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            TaskStatus::Draft => StatusKind::Draft,
            TaskStatus::Ready => StatusKind::Ready,
            TaskStatus::Blocked { .. } => StatusKind::Blocked,
            TaskStatus::Sent { .. } => StatusKind::Sent,
            TaskStatus::Failed { .. } => StatusKind::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    #[serde(flatten)]
    pub status: TaskStatus,

    /// Local wall-clock time of the event in the hospital system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("milestone {milestone}: illegal transition {from:?} -> {to:?}")]
    Illegal {
        milestone: Milestone,
        from: Option<StatusKind>,
        to: StatusKind,
    },

    #[error("milestone {milestone} cannot be SENT before {missing}")]
    DependencyNotSent {
        milestone: Milestone,
        missing: Milestone,
    },
}

/// Outcome of the registration check done at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Ready,
    Blocked(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskProgress {
    entries: BTreeMap<Milestone, ProgressEntry>,
}

impl TaskProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, milestone: Milestone) -> Option<&ProgressEntry> {
        self.entries.get(&milestone)
    }

    pub fn status_kind(&self, milestone: Milestone) -> Option<StatusKind> {
        self.get(milestone).map(|e| e.status.kind())
    }

    pub fn is_sent(&self, milestone: Milestone) -> bool {
        self.status_kind(milestone) == Some(StatusKind::Sent)
    }

    pub fn event_time(&self, milestone: Milestone) -> Option<NaiveDateTime> {
        self.get(milestone).and_then(|e| e.event_time)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Milestone, &ProgressEntry)> {
        self.entries.iter().map(|(m, e)| (*m, e))
    }

    /// Set the registration entry to READY or BLOCKED.
    ///
    /// Also used by revalidation, so a BLOCKED or FAILED registration can
    /// be re-admitted.
    pub fn admit(
        &mut self,
        admission: Admission,
        event_time: Option<NaiveDateTime>,
    ) -> Result<(), TransitionError> {
        let status = match admission {
            Admission::Ready => TaskStatus::Ready,
            Admission::Blocked(blocked_reason) => TaskStatus::Blocked { blocked_reason },
        };
        let event_time = event_time.or_else(|| self.event_time(Milestone::Register));
        self.apply(Milestone::Register, status, event_time)
    }

    /// Record that a non-registration milestone happened.
    ///
    /// Returns `Ok(false)` when the entry already moved past DRAFT, so
    /// re-reading a batch window never regresses it.
    pub fn record_event(
        &mut self,
        milestone: Milestone,
        event_time: NaiveDateTime,
    ) -> Result<bool, TransitionError> {
        match self.status_kind(milestone) {
            Some(StatusKind::Sent | StatusKind::Failed) => Ok(false),
            Some(StatusKind::Draft) => {
                if let Some(entry) = self.entries.get_mut(&milestone) {
                    entry.event_time = Some(event_time);
                }
                Ok(true)
            }
            _ => {
                self.apply(milestone, TaskStatus::Draft, Some(event_time))?;
                Ok(true)
            }
        }
    }

    pub fn mark_sent(
        &mut self,
        milestone: Milestone,
        sent_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let event_time = self.event_time(milestone);
        self.apply(milestone, TaskStatus::Sent { sent_at }, event_time)
    }

    pub fn mark_failed(
        &mut self,
        milestone: Milestone,
        failed_reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let event_time = self.event_time(milestone);
        let status = TaskStatus::Failed {
            failed_reason: failed_reason.into(),
        };
        self.apply(milestone, status, event_time)
    }

    fn apply(
        &mut self,
        milestone: Milestone,
        status: TaskStatus,
        event_time: Option<NaiveDateTime>,
    ) -> Result<(), TransitionError> {
        self.check_transition(milestone, &status)?;
        self.entries
            .insert(milestone, ProgressEntry { status, event_time });
        Ok(())
    }

    /// The only place where transition legality is decided.
    pub fn check_transition(
        &self,
        milestone: Milestone,
        next: &TaskStatus,
    ) -> Result<(), TransitionError> {
        use StatusKind::*;

        let from = self.status_kind(milestone);
        let to = next.kind();
        let allowed = if milestone.is_register() {
            matches!(
                (from, to),
                (None | Some(Ready | Blocked | Failed), Ready | Blocked)
                    | (Some(Ready | Failed), Sent)
                    | (Some(Ready | Failed), Failed)
            )
        } else {
            matches!(
                (from, to),
                (None, Draft) | (Some(Draft | Failed), Sent | Failed)
            )
        };
        if !allowed {
            return Err(TransitionError::Illegal {
                milestone,
                from,
                to,
            });
        }

        if to == Sent
            && let DependencyCheck::Unsatisfied { missing } = dependency::check(self, milestone)
        {
            return Err(TransitionError::DependencyNotSent { milestone, missing });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_sent(milestones: &[Milestone], at: DateTime<Utc>) -> Self {
        let entries = milestones
            .iter()
            .map(|m| {
                let entry = ProgressEntry {
                    status: TaskStatus::Sent { sent_at: at },
                    event_time: None,
                };
                (*m, entry)
            })
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rstest::rstest;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 24)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 24, 2, 0, 0).unwrap()
    }

    #[test]
    fn registration_moves_ready_to_sent() {
        let mut p = TaskProgress::new();
        p.admit(Admission::Ready, Some(at(7, 30))).unwrap();
        assert_eq!(p.status_kind(Milestone::Register), Some(StatusKind::Ready));

        p.mark_sent(Milestone::Register, now()).unwrap();
        assert!(p.is_sent(Milestone::Register));
        assert_eq!(p.event_time(Milestone::Register), Some(at(7, 30)));
    }

    #[test]
    fn blocked_registration_can_be_readmitted() {
        let mut p = TaskProgress::new();
        p.admit(Admission::Blocked("no schedule".into()), Some(at(7, 30)))
            .unwrap();
        assert!(p.mark_sent(Milestone::Register, now()).is_err());

        p.admit(Admission::Ready, None).unwrap();
        assert_eq!(p.status_kind(Milestone::Register), Some(StatusKind::Ready));
        assert_eq!(p.event_time(Milestone::Register), Some(at(7, 30)));
    }

    #[rstest]
    #[case::checkin(Milestone::CheckIn)]
    #[case::close(Milestone::Close)]
    fn non_registration_cannot_be_ready(#[case] milestone: Milestone) {
        let p = TaskProgress::new();
        let err = p.check_transition(milestone, &TaskStatus::Ready).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { to: StatusKind::Ready, .. }));
    }

    #[test]
    fn sent_requires_dependencies() {
        let mut p = TaskProgress::new();
        p.admit(Admission::Ready, Some(at(7, 0))).unwrap();
        p.record_event(Milestone::CheckIn, at(8, 0)).unwrap();

        let err = p.mark_sent(Milestone::CheckIn, now()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::DependencyNotSent {
                milestone: Milestone::CheckIn,
                missing: Milestone::Register,
            }
        );

        p.mark_sent(Milestone::Register, now()).unwrap();
        p.mark_sent(Milestone::CheckIn, now()).unwrap();
        assert!(p.is_sent(Milestone::CheckIn));
    }

    #[test]
    fn re_recording_a_sent_milestone_is_a_no_op() {
        let mut p = TaskProgress::new();
        p.admit(Admission::Ready, Some(at(7, 0))).unwrap();
        p.mark_sent(Milestone::Register, now()).unwrap();
        p.record_event(Milestone::CheckIn, at(8, 0)).unwrap();
        p.mark_sent(Milestone::CheckIn, now()).unwrap();

        let changed = p.record_event(Milestone::CheckIn, at(8, 0)).unwrap();
        assert!(!changed);
        assert!(p.is_sent(Milestone::CheckIn));
    }

    #[test]
    fn sent_is_terminal() {
        let mut p = TaskProgress::new();
        p.admit(Admission::Ready, Some(at(7, 0))).unwrap();
        p.mark_sent(Milestone::Register, now()).unwrap();

        assert!(p.mark_failed(Milestone::Register, "late error").is_err());
        assert!(p.admit(Admission::Ready, None).is_err());
    }

    #[test]
    fn failed_milestone_can_still_be_sent_after_manual_retry() {
        let mut p = TaskProgress::with_sent(&[Milestone::Register], now());
        p.record_event(Milestone::CheckIn, at(8, 0)).unwrap();
        p.mark_failed(Milestone::CheckIn, "code 201").unwrap();
        p.mark_sent(Milestone::CheckIn, now()).unwrap();
        assert!(p.is_sent(Milestone::CheckIn));
    }

    #[test]
    fn persisted_shape_is_keyed_by_milestone_id() {
        let mut p = TaskProgress::new();
        p.admit(Admission::Blocked("missing mapping".into()), Some(at(7, 0)))
            .unwrap();
        p.record_event(Milestone::CheckIn, at(8, 15)).unwrap();

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["1"]["status"], "BLOCKED");
        assert_eq!(json["1"]["blocked_reason"], "missing mapping");
        assert_eq!(json["3"]["status"], "DRAFT");
        assert_eq!(json["3"]["event_time"], "2026-01-24T08:15:00");

        let back: TaskProgress = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
