//! App - アプリケーション層
//!
//! ports を組み合わせて同期パイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **PipelineBuilder**: サービス一式の構築とワイヤリング
//! - **CursorPoller**: 病院側テーブルの取り込み（ストリームごとの watermark）
//! - **RegistrationAdmitter**: 診療枠と枠数による受付判定（READY / BLOCKED）
//! - **QueueBuilder**: 送信可能な進捗からジョブを作る
//! - **DispatchWorker**: ジョブを保険者 API に送り、結果を記録する
//! - **AdminService / StatusService**: 運用操作と診断
//! - **TaskGroup**: 定期タスクの実行

pub mod admin;
pub mod admission;
pub mod builder;
pub mod dispatch;
pub mod poller;
pub mod queue_builder;
pub mod quota;
pub mod refresh_cache;
pub mod schedule_validator;
pub mod scheduler;
pub mod status;
pub mod task_validator;
pub mod tasks;

#[cfg(test)]
mod scenarios;

// 主要な型を再エクスポート
pub use self::admin::{AdminService, RefreshResult, RevalidationReport};
pub use self::admission::{Assessment, RegistrationAdmitter, RegistrationKey};
pub use self::builder::{BuildError, Pipeline, PipelineBuilder};
pub use self::dispatch::{DispatchOutcome, DispatchWorker};
pub use self::poller::{CursorPoller, PollReport};
pub use self::queue_builder::{BuildReport, QueueBuilder};
pub use self::quota::{QuotaAggregator, QuotaInfo, ScheduleRefresher};
pub use self::refresh_cache::{RefreshCacheStats, RefreshLocks};
pub use self::schedule_validator::{AutoFetchDefaults, ScheduleCheck, ScheduleValidator};
pub use self::scheduler::{PeriodicTask, TaskGroup};
pub use self::status::{StatusReport, StatusService, VisitStatus};
pub use self::task_validator::TaskValidator;
