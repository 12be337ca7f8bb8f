//! Task Validator - 依存関係チェックと ValidationIssue の管理
//!
//! 依存表の評価そのものは domain::dependency にあり、ここは結果を
//! issue として記録・解消するだけ。
//!
//! - 未充足は失敗ではない。issue を 1 件（PENDING の重複なし）残して次の周期で再評価
//! - Queue Builder がそのマイルストーンを enqueue したら PENDING を自動で RESOLVED に

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::dependency::{self, DependencyCheck};
use crate::domain::{
    IssueId, IssueReason, IssueStatus, Milestone, SyncError, ValidationIssue, Visit,
};
use crate::ports::{Clock, IdGenerator, IssueStore};

pub struct TaskValidator {
    issues: Arc<dyn IssueStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl TaskValidator {
    pub fn new(issues: Arc<dyn IssueStore>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { issues, ids, clock }
    }

    /// `milestone` の依存表を評価し、先行が未 SENT なら issue を記録する
    pub async fn check(
        &self,
        visit: &Visit,
        milestone: Milestone,
    ) -> Result<DependencyCheck, SyncError> {
        let check = dependency::check(&visit.progress, milestone);
        if let DependencyCheck::Unsatisfied { missing } = check {
            let reason = IssueReason::for_ordering(milestone, missing);
            let issue = ValidationIssue::new(
                self.ids.generate_issue_id(),
                &visit.visit_id,
                milestone,
                Some(missing),
                reason,
                format!("{milestone} arrived before {missing} was sent"),
                self.clock.now(),
            );
            if self.issues.insert_issue_if_absent(issue).await? {
                info!(visit_id = %visit.visit_id, milestone = %milestone, reason = %reason, "dependency issue recorded");
            }
        }
        Ok(check)
    }

    /// ペイロード不備を記録する。新しい issue を書いたかどうかを返す
    pub async fn record_defect(
        &self,
        visit_id: &str,
        milestone: Milestone,
        reason: IssueReason,
        message: impl Into<String>,
    ) -> Result<bool, SyncError> {
        let issue = ValidationIssue::new(
            self.ids.generate_issue_id(),
            visit_id,
            milestone,
            None,
            reason,
            message,
            self.clock.now(),
        );
        Ok(self.issues.insert_issue_if_absent(issue).await?)
    }

    /// キュー投入済みの (visit, milestone) の未解決 issue をすべて resolve する
    pub async fn resolve_cleared(
        &self,
        visit_id: &str,
        milestone: Milestone,
    ) -> Result<usize, SyncError> {
        let now = self.clock.now();
        let mut resolved = 0;
        for mut issue in self.issues.issues_for_visit(visit_id).await? {
            if issue.milestone != milestone || issue.status != IssueStatus::Pending {
                continue;
            }
            issue.status = IssueStatus::Resolved;
            issue.note = Some("cleared: milestone queued".into());
            issue.updated_at = now;
            self.issues.save_issue(&issue).await?;
            resolved += 1;
        }
        if resolved > 0 {
            info!(visit_id, milestone = %milestone, resolved, "issues auto-resolved");
        }
        Ok(resolved)
    }

    pub async fn resolve(
        &self,
        issue_id: IssueId,
        note: impl Into<String>,
    ) -> Result<ValidationIssue, SyncError> {
        self.close(issue_id, IssueStatus::Resolved, note.into()).await
    }

    pub async fn ignore(
        &self,
        issue_id: IssueId,
        note: impl Into<String>,
    ) -> Result<ValidationIssue, SyncError> {
        self.close(issue_id, IssueStatus::Ignored, note.into()).await
    }

    async fn close(
        &self,
        issue_id: IssueId,
        status: IssueStatus,
        note: String,
    ) -> Result<ValidationIssue, SyncError> {
        let mut issue = self
            .issues
            .get_issue(issue_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("issue {issue_id}")))?;
        if issue.status != IssueStatus::Pending {
            warn!(issue_id = %issue_id, status = ?issue.status, "issue already closed");
            return Err(SyncError::InvalidState(format!(
                "issue {issue_id} is {:?}",
                issue.status
            )));
        }
        issue.status = status;
        issue.note = Some(note);
        issue.updated_at = self.clock.now();
        self.issues.save_issue(&issue).await?;
        Ok(issue)
    }

    /// 未解決 issue を Visit ごとにまとめる
    pub async fn pending_by_visit(
        &self,
        limit: usize,
    ) -> Result<BTreeMap<String, Vec<ValidationIssue>>, SyncError> {
        let pending = self.issues.issues_with_status(IssueStatus::Pending, limit).await?;
        let mut grouped: BTreeMap<String, Vec<ValidationIssue>> = BTreeMap::new();
        for issue in pending {
            grouped.entry(issue.visit_id.clone()).or_default().push(issue);
        }
        Ok(grouped)
    }
}
