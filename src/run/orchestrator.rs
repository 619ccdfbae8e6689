use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{BranchMode, CollectOptions};
use crate::error::{EtlError, EtlResult};
use crate::model::clock::Clock;
use crate::model::record::{Record, RepositoryRecord, RunStatus, Table};
use crate::model::source::Project;
use crate::run::{RunRecorder, RunStats, StatsSnapshot};
use crate::sink::{BatchedSink, WatermarkStore, Watermarks};
use crate::source::SourceAdapter;

// ---------------------------------------------------------------------------
// Orchestrator: projects -> repositories -> entity collection, one run
// ---------------------------------------------------------------------------

/// Result of one finalized run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub stats: StatsSnapshot,
}

/// Drives a single collection run: opens the run record, walks projects and
/// repositories through the adapter, pushes mapped records into the sink,
/// and finalizes the run with status and statistics.
///
/// Failure isolation follows the error taxonomy: a repository-level failure
/// is logged and counted and the walk continues; project-listing and sink
/// failures abort the run.
pub struct Orchestrator {
    adapter: Arc<dyn SourceAdapter>,
    sink: Mutex<BatchedSink>,
    watermark_store: Arc<dyn WatermarkStore>,
    clock: Arc<dyn Clock>,
    options: CollectOptions,
    settings: Value,
    cancel: Arc<AtomicBool>,
    stats: RunStats,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        sink: BatchedSink,
        watermark_store: Arc<dyn WatermarkStore>,
        clock: Arc<dyn Clock>,
        options: CollectOptions,
        settings: Value,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            sink: Mutex::new(sink),
            watermark_store,
            clock,
            options,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: RunStats::new(),
        })
    }

    /// Cooperative cancellation: raising the flag stops new upstream
    /// requests at the next completion boundary; the sink is flushed and
    /// the run finalizes as failed.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Execute the run to completion. `Ok` means the run was finalized and
    /// recorded, whatever its terminal status; `Err` means even
    /// finalization failed.
    pub async fn run(self: &Arc<Self>) -> EtlResult<RunOutcome> {
        let recorder = RunRecorder::new(
            self.adapter.data_source(),
            self.clock.now(),
            self.settings.clone(),
        );
        let run_id = recorder.run_id.clone();
        info!(run_id, upstream = %self.adapter.data_source(), "starting collection run");

        let begin_version = self.clock.now_ms();
        {
            let mut sink = self.sink.lock().await;
            sink.push(Record::CollectionRun(recorder.begin(begin_version)))
                .await?;
            sink.flush(Table::CollectionRuns).await?;
        }

        let outcome = self.collect(&run_id).await;
        let status = match &outcome {
            Ok(()) => RunStatus::Completed,
            Err(EtlError::Cancelled) => {
                warn!(run_id, "run cancelled");
                RunStatus::Failed
            }
            Err(err) => {
                error!(
                    run_id,
                    upstream = %self.adapter.data_source(),
                    kind = err.kind().as_str(),
                    error = %err,
                    "run failed"
                );
                self.stats.error();
                RunStatus::Failed
            }
        };

        self.stats.add_errors(self.adapter.take_mapping_errors());
        self.stats.set_api_calls(self.adapter.api_calls());
        let stats = self.stats.snapshot();

        {
            // Strictly newer than the running row, so the terminal snapshot
            // wins even when the run finishes within the same millisecond.
            let terminal_version = self.clock.now_ms().max(begin_version + 1);
            let mut sink = self.sink.lock().await;
            if status != RunStatus::Completed {
                // Newest-first streams mean a partial page can carry the
                // newest record only; persisting it would advance the
                // watermark past rows that were never collected.
                let dropped = sink.discard_pending();
                if dropped > 0 {
                    warn!(run_id, rows = dropped, "discarding buffered rows from failed run");
                }
            }
            sink.push(Record::CollectionRun(recorder.finalize(
                status,
                stats,
                self.clock.now(),
                terminal_version,
            )))
            .await?;
            if status == RunStatus::Completed {
                sink.flush_all().await?;
            } else {
                sink.flush(Table::CollectionRuns).await?;
            }
        }

        info!(
            run_id,
            status = ?status,
            repos = stats.repos_processed,
            commits = stats.commits_collected,
            prs = stats.prs_collected,
            api_calls = stats.api_calls,
            errors = stats.errors,
            "run finalized"
        );
        Ok(RunOutcome {
            run_id,
            status,
            stats,
        })
    }

    async fn collect(self: &Arc<Self>, run_id: &str) -> EtlResult<()> {
        let projects = self.adapter.list_projects().await?;
        info!(run_id, projects = projects.len(), "listed projects");
        for project in &projects {
            if self.cancelled() {
                return Err(EtlError::Cancelled);
            }
            self.collect_project(run_id, project).await?;
        }
        Ok(())
    }

    async fn collect_project(self: &Arc<Self>, run_id: &str, project: &Project) -> EtlResult<()> {
        // A repository-listing failure is project-level: fatal to the run.
        let repos = self.adapter.list_repositories(project).await?;
        let repos: Vec<RepositoryRecord> = repos
            .into_iter()
            .filter(|repo| self.repo_selected(repo))
            .collect();
        info!(
            run_id,
            project = project.key,
            repos = repos.len(),
            "listed repositories"
        );

        // Repository rows land before any child rows referencing them.
        {
            let mut sink = self.sink.lock().await;
            for repo in &repos {
                sink.push(Record::Repository(repo.clone())).await?;
            }
        }

        if self.options.max_workers <= 1 || repos.len() <= 1 {
            for repo in repos {
                if self.cancelled() {
                    return Err(EtlError::Cancelled);
                }
                self.collect_repository_isolated(run_id, repo).await?;
            }
            return Ok(());
        }

        // Bounded fan-out across repositories within the project.
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers));
        let mut workers = JoinSet::new();
        for repo in repos {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let run_id = run_id.to_string();
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EtlError::Internal("worker pool closed".into()))?;
                this.collect_repository_isolated(&run_id, repo).await
            });
        }

        let mut fatal: Option<EtlError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .unwrap_or_else(|err| Err(EtlError::Internal(format!("worker panicked: {err}"))));
            if let Err(err) = result {
                if fatal.is_none() {
                    // First fatal error wins; stop the remaining workers at
                    // their next boundary.
                    self.cancel.store(true, Ordering::SeqCst);
                    fatal = Some(err);
                }
            }
        }
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The `repositories` option restricts collection to `PROJECT/slug`
    /// entries.
    fn repo_selected(&self, repo: &RepositoryRecord) -> bool {
        if self.options.repositories.is_empty() {
            return true;
        }
        let full = format!("{}/{}", repo.project_key, repo.repo_slug);
        self.options
            .repositories
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(&full))
    }

    /// Repository-level error isolation: anything short of a sink failure
    /// or cancellation is logged, counted, and skipped.
    async fn collect_repository_isolated(
        &self,
        run_id: &str,
        repo: RepositoryRecord,
    ) -> EtlResult<()> {
        let project_key = repo.project_key.clone();
        let repo_slug = repo.repo_slug.clone();
        match self.collect_repository(&repo).await {
            Ok(()) => {
                self.stats.repo_processed();
            }
            Err(err) if err.is_fatal_to_run() => return Err(err),
            Err(err) => {
                self.stats.error();
                error!(
                    run_id,
                    upstream = %self.adapter.data_source(),
                    project_key,
                    repo_slug,
                    kind = err.kind().as_str(),
                    error = %err,
                    "repository collection failed, skipping"
                );
            }
        }
        self.stats.add_errors(self.adapter.take_mapping_errors());
        Ok(())
    }

    async fn collect_repository(&self, repo: &RepositoryRecord) -> EtlResult<()> {
        let project_key = repo.project_key.as_str();
        let repo_slug = repo.repo_slug.as_str();
        let capabilities = self.adapter.capabilities();

        let watermarks = if self.options.force_refetch {
            Watermarks::default()
        } else {
            self.watermark_store
                .watermarks(project_key, repo_slug, &self.adapter.data_source())
                .await?
        };

        let branches = self.adapter.list_branches(project_key, repo_slug).await?;
        {
            let mut sink = self.sink.lock().await;
            for branch in &branches {
                sink.push(Record::Branch(branch.clone())).await?;
            }
        }

        if self.options.commits {
            let walk: Vec<&crate::model::record::BranchRecord> = match self.options.branches {
                BranchMode::All => branches.iter().collect(),
                BranchMode::Default => branches
                    .iter()
                    .find(|b| b.is_default == 1)
                    .or_else(|| branches.first())
                    .into_iter()
                    .collect(),
            };
            let floor = self.options.since.or(watermarks.max_commit_date);

            // A commit reachable from several branches lands once; the
            // first-walked branch keeps the branch attribute.
            let mut seen: HashSet<String> = HashSet::new();
            for branch in walk {
                self.collect_branch_commits(
                    project_key,
                    repo_slug,
                    &branch.branch_name,
                    floor,
                    capabilities.inline_commit_files,
                    &mut seen,
                )
                .await?;
            }
        }

        if self.options.pull_requests {
            let floor = self.options.since.or(watermarks.max_pr_updated);
            self.collect_pull_requests(project_key, repo_slug, floor)
                .await?;
        }

        Ok(())
    }

    async fn collect_branch_commits(
        &self,
        project_key: &str,
        repo_slug: &str,
        branch: &str,
        floor: Option<DateTime<Utc>>,
        inline_files: bool,
        seen: &mut HashSet<String>,
    ) -> EtlResult<()> {
        let mut stream = self
            .adapter
            .stream_commits(project_key, repo_slug, branch, floor)
            .await?;

        loop {
            if self.cancelled() {
                stream.stop();
                return Err(EtlError::Cancelled);
            }
            let Some(bundle) = stream.next().await? else {
                return Ok(());
            };
            // Re-check after the pull: a cancellation raised while the page
            // request was in flight must not emit any record from that page.
            if self.cancelled() {
                stream.stop();
                return Err(EtlError::Cancelled);
            }
            let date = bundle.commit.date;
            if let Some(floor) = floor {
                if date < floor {
                    // The stream is newest-first; everything below the
                    // watermark is already in the store.
                    stream.stop();
                    return Ok(());
                }
                if date == floor {
                    continue;
                }
            }
            if let Some(until) = self.options.until {
                if date > until {
                    continue;
                }
            }
            if !seen.insert(bundle.commit.commit_hash.clone()) {
                continue;
            }

            let mut commit = bundle.commit;
            let mut files = bundle.files;
            if !inline_files {
                files = self
                    .adapter
                    .stream_commit_files(project_key, repo_slug, &commit.commit_hash)
                    .await?;
                commit.files_changed = files.len() as i64;
                commit.lines_added = files.iter().map(|f| f.lines_added).sum();
                commit.lines_removed = files.iter().map(|f| f.lines_removed).sum();
            }

            {
                let mut sink = self.sink.lock().await;
                sink.push(Record::Commit(commit)).await?;
                for file in files {
                    sink.push(Record::CommitFile(file)).await?;
                }
                for ticket in bundle.tickets {
                    sink.push(Record::Ticket(ticket)).await?;
                }
            }
            self.stats.commit_collected();
        }
    }

    async fn collect_pull_requests(
        &self,
        project_key: &str,
        repo_slug: &str,
        floor: Option<DateTime<Utc>>,
    ) -> EtlResult<()> {
        let mut stream = self
            .adapter
            .stream_pull_requests(project_key, repo_slug, floor)
            .await?;

        loop {
            if self.cancelled() {
                stream.stop();
                return Err(EtlError::Cancelled);
            }
            let Some(bundle) = stream.next().await? else {
                return Ok(());
            };
            // Same as the commit path: nothing from an aborted page lands.
            if self.cancelled() {
                stream.stop();
                return Err(EtlError::Cancelled);
            }
            let updated = bundle.pull_request.updated_on;
            if let Some(floor) = floor {
                if updated < floor {
                    stream.stop();
                    return Ok(());
                }
                if updated == floor {
                    continue;
                }
            }
            if let Some(until) = self.options.until {
                if updated > until {
                    continue;
                }
            }

            {
                let mut sink = self.sink.lock().await;
                sink.push(Record::PullRequest(bundle.pull_request)).await?;
                for reviewer in bundle.reviewers {
                    sink.push(Record::Reviewer(reviewer)).await?;
                }
                for comment in bundle.comments {
                    sink.push(Record::PrComment(comment)).await?;
                }
                for link in bundle.commits {
                    sink.push(Record::PrCommit(link)).await?;
                }
                for ticket in bundle.tickets {
                    sink.push(Record::Ticket(ticket)).await?;
                }
            }
            self.stats.pr_collected();
        }
    }
}
