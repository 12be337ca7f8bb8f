//! 定期タスクの具体実装
//!
//! - ストリームごとの poll（6 本）
//! - queue build
//! - dispatch（1 tick で 1 ジョブ）
//! - 診療枠 refresh（今日と明日）
//! - BLOCKED の再検証

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, FixedOffset};
use tracing::debug;

use super::admin::AdminService;
use super::dispatch::{DispatchOutcome, DispatchWorker};
use super::poller::CursorPoller;
use super::queue_builder::QueueBuilder;
use super::scheduler::PeriodicTask;
use crate::domain::{Milestone, SyncError};
use crate::ports::Clock;

pub struct StreamPollTask {
    name: String,
    poller: Arc<CursorPoller>,
    stream: Milestone,
    interval: Duration,
}

impl StreamPollTask {
    pub fn new(poller: Arc<CursorPoller>, stream: Milestone, interval: Duration) -> Self {
        Self {
            name: format!("poll:{}", stream.stream()),
            poller,
            stream,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicTask for StreamPollTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        self.poller.poll(self.stream).await.map(|_| ())
    }
}

pub struct QueueBuildTask {
    builder: Arc<QueueBuilder>,
    interval: Duration,
}

impl QueueBuildTask {
    pub fn new(builder: Arc<QueueBuilder>, interval: Duration) -> Self {
        Self { builder, interval }
    }
}

#[async_trait]
impl PeriodicTask for QueueBuildTask {
    fn name(&self) -> &str {
        "queue-build"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        self.builder.build_once().await.map(|_| ())
    }
}

pub struct DispatchTask {
    worker: Arc<DispatchWorker>,
    interval: Duration,
}

impl DispatchTask {
    pub fn new(worker: Arc<DispatchWorker>, interval: Duration) -> Self {
        Self { worker, interval }
    }
}

#[async_trait]
impl PeriodicTask for DispatchTask {
    fn name(&self) -> &str {
        "dispatch"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        if self.worker.process_next().await? == DispatchOutcome::Idle {
            debug!("no pending job");
        }
        Ok(())
    }
}

pub struct ScheduleRefreshTask {
    admin: Arc<AdminService>,
    clinics: Vec<String>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    interval: Duration,
}

impl ScheduleRefreshTask {
    pub fn new(
        admin: Arc<AdminService>,
        clinics: Vec<String>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
        interval: Duration,
    ) -> Self {
        Self {
            admin,
            clinics,
            clock,
            offset,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicTask for ScheduleRefreshTask {
    fn name(&self) -> &str {
        "schedule-refresh"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        if self.clinics.is_empty() {
            return Ok(());
        }
        let today = self.clock.local_today(self.offset);
        let dates: Vec<_> = [Some(today), today.checked_add_days(Days::new(1))]
            .into_iter()
            .flatten()
            .collect();
        self.admin.refresh_schedules(&self.clinics, &dates).await;
        Ok(())
    }
}

pub struct RevalidationTask {
    admin: Arc<AdminService>,
    limit: usize,
    interval: Duration,
}

impl RevalidationTask {
    pub fn new(admin: Arc<AdminService>, limit: usize, interval: Duration) -> Self {
        Self {
            admin,
            limit,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicTask for RevalidationTask {
    fn name(&self) -> &str {
        "revalidate-blocked"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        self.admin.revalidate_blocked(self.limit).await.map(|_| ())
    }
}
