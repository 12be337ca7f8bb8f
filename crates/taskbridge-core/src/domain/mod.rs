//! Domain model (milestones, progress, schedules, jobs, issues, ...).
//!
//! I/O を持たない純粋な型とルールだけを置きます。
//! 状態遷移の正当性はすべてここで判定し、app 層はそれを呼ぶだけにする。

pub mod decision;
pub mod dependency;
pub mod dispatch_log;
pub mod errors;
pub mod ids;
pub mod issue;
pub mod job;
pub mod milestone;
pub mod payload;
pub mod progress;
pub mod schedule;
pub mod visit;
pub mod watermark;

pub use decision::{Decider, Decision, DefaultDecider};
pub use dependency::{DependencyCheck, Requirement};
pub use dispatch_log::DispatchAttempt;
pub use errors::{ErrorKind, SyncError};
pub use ids::{AttemptId, IssueId, JobId};
pub use issue::{IssueReason, IssueStatus, ValidationIssue};
pub use job::{JobStatus, QueueJob};
pub use milestone::{Milestone, UnknownMilestone};
pub use payload::{JobPayload, MilestoneUpdatePayload, RegistrationPayload};
pub use progress::{Admission, ProgressEntry, StatusKind, TaskProgress, TaskStatus, TransitionError};
pub use schedule::{DayName, ScheduleSnapshot, ScheduleSource};
pub use visit::{PayloadSnapshot, ProgressChange, ProgressOutcome, Visit};
pub use watermark::PollingWatermark;
