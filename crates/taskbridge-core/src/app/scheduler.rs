//! Scheduler - 定期タスクの実行
//!
//! タスクごとに tokio task を 1 つ起動する。
//! - 実行は直列（前回の run_once が終わるまで次の tick は来ない）
//! - 取りこぼした tick はスキップ
//! - エラーはログに出すだけで、グループは止めない

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::domain::SyncError;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    async fn run_once(&self) -> Result<(), SyncError>;
}

/// タスクグループのハンドル
/// - `request_shutdown()` で全タスクに停止を通知
/// - `shutdown_and_join()` で実行中の run_once が終わるのを待つ
pub struct TaskGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub fn spawn(tasks: Vec<Arc<dyn PeriodicTask>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                task_loop(task, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// 実行中の処理は中断しない。次の tick の前でループを止める
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "periodic task panicked");
            }
        }
    }
}

async fn task_loop(task: Arc<dyn PeriodicTask>, shutdown_rx: &mut watch::Receiver<bool>) {
    let mut ticker = interval(task.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(task = task.name(), interval_ms = task.interval().as_millis() as u64, "periodic task started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = ticker.tick() => {}
        }

        match task.run_once().await {
            Ok(()) => debug!(task = task.name(), "run finished"),
            Err(e) => warn!(task = task.name(), error = %e, kind = ?e.kind(), "run failed"),
        }
    }

    info!(task = task.name(), "periodic task stopped");
}
