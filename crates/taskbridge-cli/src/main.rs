//! taskbridge - 病院側イベントを保険者 API に同期するプロセス
//!
//! - `run`: 定期タスクを起動し、Ctrl-C で止める
//! - `once`: poll → queue build → dispatch を 1 周だけ回す
//! - `status` / `revalidate` / `refresh`: 運用者向けの単発操作
//!
//! store はプロセス内メモリなので、単発操作の前にフィクスチャを 1 周取り込む。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use taskbridge_core::app::{BuildReport, DispatchOutcome, Pipeline, PipelineBuilder, PollReport};
use taskbridge_core::config::{SyncConfig, load_dotenv};
use taskbridge_core::impls::{HttpAuthority, InMemorySource, InMemoryStore, StaticHeaders, StubAuthority};
use taskbridge_core::ports::{AuthorityApi, Clock, Stores, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "taskbridge", about = "Sync hospital milestones to the insurance authority")]
struct Cli {
    /// JSON fixture with the hospital tables (registrations, milestones, weekday schedules).
    #[arg(long, env = "TASKBRIDGE_FIXTURE", global = true)]
    fixture: Option<PathBuf>,

    /// Overrides TASKBRIDGE_AUTHORITY_URL.
    #[arg(long, env = "TASKBRIDGE_AUTHORITY_URL", global = true)]
    authority_url: Option<String>,

    /// Answer every authority call locally instead of sending it.
    #[arg(long, env = "TASKBRIDGE_DRY_RUN", global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the periodic tasks until Ctrl-C.
    Run,
    /// One poll / build / dispatch pass.
    Once,
    /// Print watermarks, queue and issue statistics.
    Status {
        #[arg(long, default_value_t = 100)]
        issue_limit: usize,
    },
    /// Re-run admission for a registration that was not sent.
    Revalidate { visit_id: String },
    /// Refresh schedules from the authority.
    Refresh {
        #[arg(long = "clinic", required = true)]
        clinics: Vec<String>,
        /// Defaults to today.
        #[arg(long = "date")]
        dates: Vec<NaiveDate>,
    },
}

#[derive(Debug, Serialize)]
struct PassReport {
    polls: Vec<PollReport>,
    build: BuildReport,
    dispatched: Vec<DispatchOutcome>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn authority(cli: &Cli, config: &SyncConfig) -> Result<Arc<dyn AuthorityApi>> {
    if cli.dry_run {
        info!("dry run: authority calls are answered locally");
        return Ok(Arc::new(StubAuthority::new()));
    }
    let signer = Arc::new(StaticHeaders {
        cons_id: config.authority.cons_id.clone(),
        user_key: config.authority.user_key.clone(),
    });
    let client = HttpAuthority::new(&config.authority.base_url, config.authority.timeout, signer)
        .context("failed to build authority client")?;
    Ok(Arc::new(client))
}

fn pipeline(cli: &Cli) -> Result<Pipeline> {
    let mut config = SyncConfig::from_env().context("invalid TASKBRIDGE_* configuration")?;
    if let Some(url) = &cli.authority_url {
        config.authority.base_url = url.clone();
    }

    let source = match &cli.fixture {
        Some(path) => InMemorySource::from_json_file(path)
            .with_context(|| format!("failed to load fixture {}", path.display()))?,
        None => {
            warn!("no fixture given, the hospital source is empty");
            InMemorySource::new()
        }
    };
    let authority = authority(cli, &config)?;

    PipelineBuilder::new(config)
        .stores(Stores::shared(Arc::new(InMemoryStore::new())))
        .source(Arc::new(source))
        .authority(authority)
        .build()
        .context("failed to wire the pipeline")
}

async fn sync_pass(pipeline: &Pipeline) -> Result<PassReport> {
    let polls = pipeline.poller.poll_all().await;
    let build = pipeline
        .queue_builder
        .build_once()
        .await
        .context("queue build failed")?;

    let mut dispatched = Vec::new();
    // bounded so a permanently failing job cannot spin here
    let budget = build.registrations_queued + build.milestones_queued;
    for _ in 0..budget {
        let outcome = pipeline.worker.process_next().await.context("dispatch failed")?;
        if outcome == DispatchOutcome::Idle {
            break;
        }
        dispatched.push(outcome);
    }
    Ok(PassReport {
        polls,
        build,
        dispatched,
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(pipeline: Pipeline) -> Result<()> {
    let group = pipeline.start();
    info!(tasks = group.len(), "taskbridge running, Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    group.shutdown_and_join().await;

    let report = pipeline.status.report(100).await?;
    print_json(&report)
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    init_tracing();

    let cli = Cli::parse();
    let pipeline = pipeline(&cli)?;

    match cli.command {
        Command::Run => run(pipeline).await,
        Command::Once => print_json(&sync_pass(&pipeline).await?),
        Command::Status { issue_limit } => {
            sync_pass(&pipeline).await?;
            let report = pipeline.status.report(issue_limit).await?;
            let issues = pipeline.status.pending_issues_by_visit(issue_limit).await?;
            print_json(&serde_json::json!({ "report": report, "pending_issues": issues }))
        }
        Command::Revalidate { visit_id } => {
            sync_pass(&pipeline).await?;
            let status = pipeline
                .admin
                .revalidate_visit(&visit_id)
                .await
                .with_context(|| format!("revalidation of {visit_id} failed"))?;
            print_json(&serde_json::json!({ "visit_id": visit_id, "status": status }))
        }
        Command::Refresh { clinics, mut dates } => {
            if dates.is_empty() {
                dates.push(SystemClock.local_today(pipeline.config.utc_offset()));
            }
            let results = pipeline.admin.refresh_schedules(&clinics, &dates).await;
            print_json(&results)
        }
    }
}
