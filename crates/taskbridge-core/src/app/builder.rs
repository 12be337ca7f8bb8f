//! PipelineBuilder - サービス一式の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - store / source / authority が揃っていなければ BuildError::MissingComponent
//! - 設定値の矛盾（batch_size 0、比率が 0..=1 の外など）は BuildError::InvalidConfig
//! - clock / id 生成 / decider は省略可能（本番用の既定値）

use std::sync::Arc;

use thiserror::Error;

use super::admin::AdminService;
use super::admission::RegistrationAdmitter;
use super::dispatch::DispatchWorker;
use super::poller::CursorPoller;
use super::queue_builder::QueueBuilder;
use super::quota::{QuotaAggregator, ScheduleRefresher};
use super::refresh_cache::RefreshLocks;
use super::schedule_validator::{AutoFetchDefaults, ScheduleValidator};
use super::scheduler::{PeriodicTask, TaskGroup};
use super::status::StatusService;
use super::task_validator::TaskValidator;
use super::tasks::{
    DispatchTask, QueueBuildTask, RevalidationTask, ScheduleRefreshTask, StreamPollTask,
};
use crate::config::SyncConfig;
use crate::domain::{Decider, DefaultDecider, Milestone};
use crate::ports::{
    AuthorityApi, Clock, HospitalSource, IdGenerator, Stores, SystemClock, UlidGenerator,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing component: {0}. Call the matching builder method before build().")]
    MissingComponent(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub struct PipelineBuilder {
    config: SyncConfig,
    stores: Option<Stores>,
    source: Option<Arc<dyn HospitalSource>>,
    authority: Option<Arc<dyn AuthorityApi>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
}

impl PipelineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            stores: None,
            source: None,
            authority: None,
            clock: None,
            ids: None,
            decider: None,
        }
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn source(mut self, source: Arc<dyn HospitalSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn authority(mut self, authority: Arc<dyn AuthorityApi>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    fn validate(config: &SyncConfig) -> Result<(), BuildError> {
        let mut problems = Vec::new();
        if config.poll.batch_size == 0 {
            problems.push("poll.batch_size must be positive");
        }
        if config.queue.build_limit == 0 {
            problems.push("queue.build_limit must be positive");
        }
        if !(0.0..=1.0).contains(&config.schedule.non_insured_quota_ratio) {
            problems.push("schedule.non_insured_quota_ratio must be within 0..=1");
        }
        if config.schedule.fallback_window_days < 0 {
            problems.push("schedule.fallback_window_days must not be negative");
        }
        if config.schedule.refresh_wait_poll.is_zero() {
            problems.push("schedule.refresh_wait_poll must be positive");
        }
        let intervals = [
            config.poll.interval,
            config.queue.build_interval,
            config.queue.dispatch_interval,
            config.queue.revalidation_interval,
            config.schedule.refresh_interval,
        ];
        if intervals.iter().any(|d| d.is_zero()) {
            problems.push("task intervals must be positive");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BuildError::InvalidConfig(problems.join("; ")))
        }
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        Self::validate(&self.config)?;
        let stores = self.stores.ok_or(BuildError::MissingComponent("stores"))?;
        let source = self.source.ok_or(BuildError::MissingComponent("source"))?;
        let authority = self
            .authority
            .ok_or(BuildError::MissingComponent("authority"))?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())) as Arc<dyn IdGenerator>);
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(self.config.queue.max_retries)) as Arc<dyn Decider>
        });

        let config = self.config;
        let offset = config.utc_offset();
        let sched = &config.schedule;

        let locks = Arc::new(RefreshLocks::new(
            sched.refresh_lock_ttl,
            sched.circuit_open_window,
        ));
        let refresher =
            ScheduleRefresher::new(authority.clone(), stores.schedules.clone(), clock.clone());
        let validator = Arc::new(ScheduleValidator::new(
            source.clone(),
            stores.schedules.clone(),
            clock.clone(),
            AutoFetchDefaults {
                start: sched.default_start,
                end: sched.default_end,
                quota: sched.default_quota,
            },
        ));
        let quota = Arc::new(QuotaAggregator::new(
            source.clone(),
            stores.schedules.clone(),
            refresher.clone(),
            locks.clone(),
            sched.clone(),
        ));
        let admitter = Arc::new(RegistrationAdmitter::new(
            validator,
            quota,
            offset,
            sched.minutes_per_queue_slot,
        ));
        let task_validator = Arc::new(TaskValidator::new(
            stores.issues.clone(),
            ids.clone(),
            clock.clone(),
        ));

        let poller = Arc::new(CursorPoller::new(
            source,
            stores.visits.clone(),
            stores.watermarks.clone(),
            admitter.clone(),
            task_validator.clone(),
            clock.clone(),
            config.poll.clone(),
            offset,
        ));
        let queue_builder = Arc::new(QueueBuilder::new(
            stores.visits.clone(),
            stores.jobs.clone(),
            stores.schedules.clone(),
            task_validator.clone(),
            ids.clone(),
            clock.clone(),
            config.queue.build_limit,
            offset,
        ));
        let worker = Arc::new(DispatchWorker::new(
            stores.visits.clone(),
            stores.jobs.clone(),
            stores.dispatch_log.clone(),
            authority,
            decider,
            ids,
            clock.clone(),
        ));
        let admin = Arc::new(AdminService::new(
            stores.visits.clone(),
            stores.jobs.clone(),
            admitter,
            refresher,
            locks.clone(),
            task_validator.clone(),
            worker.clone(),
            sched.refresh_call_delay,
        ));
        let status = Arc::new(StatusService::new(stores, locks, task_validator));

        Ok(Pipeline {
            poller,
            queue_builder,
            worker,
            admin,
            status,
            clock,
            config,
        })
    }
}

/// 組み立て済みのサービス一式（clone は安価）
#[derive(Clone)]
pub struct Pipeline {
    pub poller: Arc<CursorPoller>,
    pub queue_builder: Arc<QueueBuilder>,
    pub worker: Arc<DispatchWorker>,
    pub admin: Arc<AdminService>,
    pub status: Arc<StatusService>,
    pub clock: Arc<dyn Clock>,
    pub config: SyncConfig,
}

impl Pipeline {
    /// ストリームごとの poller に加え、queue build / dispatch /
    /// 診療枠 refresh / 再検証をそれぞれ 1 タスクとして返す
    pub fn periodic_tasks(&self) -> Vec<Arc<dyn PeriodicTask>> {
        let cfg = &self.config;
        let mut tasks: Vec<Arc<dyn PeriodicTask>> = Milestone::ALL
            .into_iter()
            .map(|stream| {
                Arc::new(StreamPollTask::new(self.poller.clone(), stream, cfg.poll.interval))
                    as Arc<dyn PeriodicTask>
            })
            .collect();
        tasks.push(Arc::new(QueueBuildTask::new(
            self.queue_builder.clone(),
            cfg.queue.build_interval,
        )));
        tasks.push(Arc::new(DispatchTask::new(
            self.worker.clone(),
            cfg.queue.dispatch_interval,
        )));
        tasks.push(Arc::new(ScheduleRefreshTask::new(
            self.admin.clone(),
            cfg.schedule.refresh_clinics.clone(),
            self.clock.clone(),
            cfg.utc_offset(),
            cfg.schedule.refresh_interval,
        )));
        tasks.push(Arc::new(RevalidationTask::new(
            self.admin.clone(),
            cfg.queue.build_limit,
            cfg.queue.revalidation_interval,
        )));
        tasks
    }

    pub fn start(&self) -> TaskGroup {
        TaskGroup::spawn(self.periodic_tasks())
    }
}
