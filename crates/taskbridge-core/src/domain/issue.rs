//! ValidationIssue - 運用者が確認すべき問題の記録
//!
//! 順序違反（前提マイルストーン未送信）とペイロード不備を記録します。
//! 追記専用で、状態だけが PENDING → RESOLVED / IGNORED に動きます。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::IssueId;
use super::milestone::Milestone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Pending,
    Resolved,
    Ignored,
}

/// Reason codes. The string form is what operators filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueReason {
    CheckinRegisterNotSent,
    StartRegisterNotSent,
    StartCheckinNotSent,
    FinishRegisterNotSent,
    FinishStartNotSent,
    PharmacyRegisterNotSent,
    PharmacyFinishNotSent,
    CloseRegisterNotSent,
    CloseFinishNotSent,
    OutOfOrder,
    PracticeHoursUnresolved,
    InvalidProviderCode,
    MissingEventTime,
}

impl IssueReason {
    /// Reason for `milestone` arriving before `missing` was SENT.
    pub fn for_ordering(milestone: Milestone, missing: Milestone) -> Self {
        use Milestone::*;
        match (milestone, missing) {
            (CheckIn, Register) => IssueReason::CheckinRegisterNotSent,
            (ServiceStart, Register) => IssueReason::StartRegisterNotSent,
            (ServiceStart, CheckIn) => IssueReason::StartCheckinNotSent,
            (ServiceFinish, Register) => IssueReason::FinishRegisterNotSent,
            (ServiceFinish, ServiceStart) => IssueReason::FinishStartNotSent,
            (PharmacyStart, Register) => IssueReason::PharmacyRegisterNotSent,
            (PharmacyStart, ServiceFinish) => IssueReason::PharmacyFinishNotSent,
            (Close, Register) => IssueReason::CloseRegisterNotSent,
            (Close, ServiceFinish | PharmacyStart) => IssueReason::CloseFinishNotSent,
            _ => IssueReason::OutOfOrder,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            IssueReason::CheckinRegisterNotSent => "checkin_register_not_sent",
            IssueReason::StartRegisterNotSent => "start_register_not_sent",
            IssueReason::StartCheckinNotSent => "start_checkin_not_sent",
            IssueReason::FinishRegisterNotSent => "finish_register_not_sent",
            IssueReason::FinishStartNotSent => "finish_start_not_sent",
            IssueReason::PharmacyRegisterNotSent => "pharmacy_register_not_sent",
            IssueReason::PharmacyFinishNotSent => "pharmacy_finish_not_sent",
            IssueReason::CloseRegisterNotSent => "close_register_not_sent",
            IssueReason::CloseFinishNotSent => "close_finish_not_sent",
            IssueReason::OutOfOrder => "out_of_order",
            IssueReason::PracticeHoursUnresolved => "practice_hours_unresolved",
            IssueReason::InvalidProviderCode => "invalid_provider_code",
            IssueReason::MissingEventTime => "missing_event_time",
        }
    }
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_id: IssueId,
    pub visit_id: String,
    pub milestone: Milestone,
    /// Predecessor that was not SENT; `None` for payload defects.
    pub missing: Option<Milestone>,
    pub reason: IssueReason,
    pub message: String,
    pub status: IssueStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationIssue {
    pub fn new(
        issue_id: IssueId,
        visit_id: impl Into<String>,
        milestone: Milestone,
        missing: Option<Milestone>,
        reason: IssueReason,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            issue_id,
            visit_id: visit_id.into(),
            milestone,
            missing,
            reason,
            message: message.into(),
            status: IssueStatus::Pending,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same visit and reason, still pending.
    pub fn duplicates(&self, other: &ValidationIssue) -> bool {
        self.status == IssueStatus::Pending
            && other.status == IssueStatus::Pending
            && self.visit_id == other.visit_id
            && self.reason == other.reason
    }
}
