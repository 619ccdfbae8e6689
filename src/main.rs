use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use insight_etl::model::clock::{Clock, SystemClock};
use insight_etl::model::record::RunStatus;
use insight_etl::run::Orchestrator;
use insight_etl::sink::{AnalyticalStore, BatchedSink};
use insight_etl::source::create_adapter;
use insight_etl::{load_config, BranchMode, EtlConfig};

/// Incremental collection of repositories, commits, and pull requests into
/// the analytical store.
#[derive(Parser)]
#[command(name = "insight-etl")]
#[command(about = "Incremental source-control ETL into a column-oriented analytical store")]
#[command(version)]
struct Cli {
    /// Path to a configuration file (otherwise `insight.toml` plus
    /// `INSIGHT__*` environment variables).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collect only these repositories (`PROJECT/slug`; repeatable).
    #[arg(long = "repo")]
    repositories: Vec<String>,

    /// Override the lower bound of the collection window (RFC 3339).
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Override the upper bound of the collection window (RFC 3339).
    #[arg(long)]
    until: Option<DateTime<Utc>>,

    /// Ignore watermarks and re-collect from the beginning of history.
    #[arg(long)]
    force_refetch: bool,

    /// Walk all branches instead of only the default branch.
    #[arg(long)]
    all_branches: bool,

    /// Sink flush threshold.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Parallel repositories per project.
    #[arg(long)]
    max_workers: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut EtlConfig) {
        if !self.repositories.is_empty() {
            config.collect.repositories = self.repositories.clone();
        }
        if self.since.is_some() {
            config.collect.since = self.since;
        }
        if self.until.is_some() {
            config.collect.until = self.until;
        }
        if self.force_refetch {
            config.collect.force_refetch = true;
        }
        if self.all_branches {
            config.collect.branches = BranchMode::All;
        }
        if let Some(batch_size) = self.batch_size {
            config.collect.batch_size = batch_size;
        }
        if let Some(max_workers) = self.max_workers {
            config.collect.max_workers = max_workers;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insight_etl=info".into()),
        )
        .init();

    match execute().await {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("insight-etl: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute() -> anyhow::Result<RunStatus> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let adapter = create_adapter(&config, Arc::clone(&clock)).context("constructing adapter")?;
    let store = Arc::new(
        AnalyticalStore::new(
            &config.sink,
            Duration::from_secs(config.upstream.timeout_secs),
        )
        .context("connecting sink")?,
    );
    let sink = BatchedSink::new(store.clone(), config.collect.batch_size);

    let orchestrator = Orchestrator::new(
        adapter,
        sink,
        store,
        clock,
        config.collect.clone(),
        config.settings_snapshot(),
    );

    // Ctrl-C raises the cooperative cancellation flag; collection stops at
    // the next completion boundary and the run finalizes as failed.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let outcome = orchestrator.run().await.context("executing run")?;
    info!(
        run_id = outcome.run_id,
        status = ?outcome.status,
        "done"
    );
    Ok(outcome.status)
}
