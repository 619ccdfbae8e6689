use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::record::{CollectionRunRecord, RunStatus};
use crate::model::source::DataSource;

pub mod orchestrator;

pub use orchestrator::{Orchestrator, RunOutcome};

// ---------------------------------------------------------------------------
// Run identity and statistics
// ---------------------------------------------------------------------------

/// `"{data_source}-{YYYYMMDD-HHMMSS}"`; unique per invocation.
pub fn new_run_id(data_source: &DataSource, started_at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        data_source.as_str(),
        started_at.format("%Y%m%d-%H%M%S")
    )
}

/// Run counters. Monotonic for the lifetime of the run; incremented through
/// atomics so bounded repo fan-out needs no extra locking.
#[derive(Debug, Default)]
pub struct RunStats {
    repos_processed: AtomicU64,
    commits_collected: AtomicU64,
    prs_collected: AtomicU64,
    api_calls: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub repos_processed: u64,
    pub commits_collected: u64,
    pub prs_collected: u64,
    pub api_calls: u64,
    pub errors: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repo_processed(&self) {
        self.repos_processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn commit_collected(&self) {
        self.commits_collected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pr_collected(&self) {
        self.prs_collected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::SeqCst);
    }

    pub fn error(&self) {
        self.add_errors(1);
    }

    /// Replace the api-call total with the adapter's counter. The counter
    /// only grows, so the run invariant holds.
    pub fn set_api_calls(&self, total: u64) {
        self.api_calls.fetch_max(total, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            repos_processed: self.repos_processed.load(Ordering::SeqCst),
            commits_collected: self.commits_collected.load(Ordering::SeqCst),
            prs_collected: self.prs_collected.load(Ordering::SeqCst),
            api_calls: self.api_calls.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

// ---------------------------------------------------------------------------
// Run recorder
// ---------------------------------------------------------------------------

/// Builds the `collection_runs` rows bracketing a run. The terminal row
/// re-uses the run id with a fresh `_version` so the completed snapshot
/// wins over the running one in the merge-on-read view.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    pub run_id: String,
    data_source: DataSource,
    started_at: DateTime<Utc>,
    settings: Value,
}

impl RunRecorder {
    pub fn new(
        data_source: DataSource,
        started_at: DateTime<Utc>,
        settings: Value,
    ) -> Self {
        Self {
            run_id: new_run_id(&data_source, started_at),
            data_source,
            started_at,
            settings,
        }
    }

    /// The `status="running"` row written before any collection.
    pub fn begin(&self, version: i64) -> CollectionRunRecord {
        CollectionRunRecord {
            run_id: self.run_id.clone(),
            data_source: self.data_source.clone(),
            started_at: self.started_at,
            completed_at: None,
            status: RunStatus::Running,
            repos_processed: 0,
            commits_collected: 0,
            prs_collected: 0,
            api_calls: 0,
            errors: 0,
            settings: self.settings.clone(),
            version,
        }
    }

    /// The terminal row with final status and counters.
    pub fn finalize(
        &self,
        status: RunStatus,
        stats: StatsSnapshot,
        completed_at: DateTime<Utc>,
        version: i64,
    ) -> CollectionRunRecord {
        CollectionRunRecord {
            run_id: self.run_id.clone(),
            data_source: self.data_source.clone(),
            started_at: self.started_at,
            completed_at: Some(completed_at),
            status,
            repos_processed: stats.repos_processed,
            commits_collected: stats.commits_collected,
            prs_collected: stats.prs_collected,
            api_calls: stats.api_calls,
            errors: stats.errors,
            settings: self.settings.clone(),
            version,
        }
    }
}
