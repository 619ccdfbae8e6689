//! End-to-end collection runs against in-crate fakes: a scripted source
//! adapter, a recording row sink, and the deterministic clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use insight_etl::config::CollectOptions;
use insight_etl::error::{EtlError, EtlResult};
use insight_etl::model::clock::{Clock, ManualClock};
use insight_etl::model::record::{
    BranchRecord, CommitRecord, PrCommitRecord, PullRequestRecord, RepositoryRecord, RunStatus,
    Table,
};
use insight_etl::model::source::{DataSource, Project};
use insight_etl::model::time;
use insight_etl::net::page::{Page, PageCursor, PageFetcher, Paged};
use insight_etl::run::Orchestrator;
use insight_etl::sink::{BatchedSink, RowSink, WatermarkStore, Watermarks};
use insight_etl::source::{
    AdapterCapabilities, CommitBundle, PullRequestBundle, SourceAdapter,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// A cancellation hook bound after construction, so a fetch can raise the
/// orchestrator's own flag (simulating an interrupt while a page request is
/// in flight).
type CancelHook = Arc<Mutex<Option<Arc<AtomicBool>>>>;

/// Serves pre-scripted pages; counts fetches and fires the cancel hook from
/// inside every fetch.
struct ScriptedFetcher<T> {
    pages: Vec<Vec<T>>,
    fetches: Arc<AtomicU64>,
    cancel_on_fetch: CancelHook,
}

#[async_trait]
impl<T: Send> PageFetcher<T> for ScriptedFetcher<T> {
    async fn fetch(&mut self, _cursor: &PageCursor) -> EtlResult<Page<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = self.cancel_on_fetch.lock().unwrap().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        if self.pages.is_empty() {
            return Ok(Page {
                items: vec![],
                next: None,
            });
        }
        let items = self.pages.remove(0);
        let next = (!self.pages.is_empty()).then_some(PageCursor::Offset(0));
        Ok(Page { items, next })
    }
}

#[derive(Default)]
struct FakeAdapter {
    data_source: Option<DataSource>,
    projects: Vec<Project>,
    repos: HashMap<String, Vec<RepositoryRecord>>,
    branches: HashMap<String, Vec<BranchRecord>>,
    commit_pages: Mutex<HashMap<String, Vec<Vec<CommitBundle>>>>,
    pr_pages: Mutex<HashMap<String, Vec<Vec<PullRequestBundle>>>>,
    commit_fetches: Arc<AtomicU64>,
    fail_branches_for: Option<String>,
    cancel_on_commit_fetch: CancelHook,
    calls: AtomicU64,
}

impl FakeAdapter {
    fn key(repo_slug: &str, branch: &str) -> String {
        format!("{repo_slug}@{branch}")
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn data_source(&self) -> DataSource {
        self.data_source
            .clone()
            .unwrap_or(DataSource::BitbucketServer)
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            bulk: false,
            inline_commit_files: true,
        }
    }

    fn api_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_mapping_errors(&self) -> u64 {
        0
    }

    async fn list_projects(&self) -> EtlResult<Vec<Project>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.projects.clone())
    }

    async fn list_repositories(&self, project: &Project) -> EtlResult<Vec<RepositoryRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.repos.get(&project.key).cloned().unwrap_or_default())
    }

    async fn list_branches(
        &self,
        _project_key: &str,
        repo_slug: &str,
    ) -> EtlResult<Vec<BranchRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_branches_for.as_deref() == Some(repo_slug) {
            return Err(EtlError::Api {
                status: 403,
                message: "forbidden".into(),
            });
        }
        Ok(self.branches.get(repo_slug).cloned().unwrap_or_default())
    }

    async fn stream_commits(
        &self,
        _project_key: &str,
        repo_slug: &str,
        branch: &str,
        _since: Option<DateTime<Utc>>,
    ) -> EtlResult<Paged<CommitBundle>> {
        let pages = self
            .commit_pages
            .lock()
            .unwrap()
            .get(&Self::key(repo_slug, branch))
            .cloned()
            .unwrap_or_default();
        Ok(Paged::new(Box::new(ScriptedFetcher {
            pages,
            fetches: Arc::clone(&self.commit_fetches),
            cancel_on_fetch: Arc::clone(&self.cancel_on_commit_fetch),
        })))
    }

    async fn stream_commit_files(
        &self,
        _project_key: &str,
        _repo_slug: &str,
        _commit_hash: &str,
    ) -> EtlResult<Vec<insight_etl::model::record::CommitFileRecord>> {
        Ok(Vec::new())
    }

    async fn stream_pull_requests(
        &self,
        _project_key: &str,
        repo_slug: &str,
        _since: Option<DateTime<Utc>>,
    ) -> EtlResult<Paged<PullRequestBundle>> {
        let pages = self
            .pr_pages
            .lock()
            .unwrap()
            .get(repo_slug)
            .cloned()
            .unwrap_or_default();
        Ok(Paged::new(Box::new(ScriptedFetcher {
            pages,
            fetches: Arc::new(AtomicU64::new(0)),
            cancel_on_fetch: CancelHook::default(),
        })))
    }
}

/// Records every inserted row, grouped by table.
#[derive(Default)]
struct RecordingSink {
    rows: Mutex<HashMap<Table, Vec<Value>>>,
}

impl RecordingSink {
    fn rows_for(&self, table: Table) -> Vec<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RowSink for RecordingSink {
    async fn insert_rows(&self, table: Table, rows: Vec<Value>) -> EtlResult<()> {
        self.rows
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .extend(rows);
        Ok(())
    }
}

#[derive(Default)]
struct FakeWatermarks {
    by_repo: HashMap<String, Watermarks>,
}

#[async_trait]
impl WatermarkStore for FakeWatermarks {
    async fn watermarks(
        &self,
        _project_key: &str,
        repo_slug: &str,
        _data_source: &DataSource,
    ) -> EtlResult<Watermarks> {
        Ok(self.by_repo.get(repo_slug).copied().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn ts(ms: i64) -> DateTime<Utc> {
    time::from_epoch_ms(ms).unwrap()
}

fn repo(project_key: &str, slug: &str) -> RepositoryRecord {
    RepositoryRecord {
        data_source: DataSource::BitbucketServer,
        project_key: project_key.into(),
        repo_slug: slug.into(),
        name: slug.into(),
        uuid: None,
        is_private: 1,
        is_empty: 0,
        fork_policy: None,
        size_bytes: None,
        language: None,
        has_issues: None,
        has_wiki: None,
        last_commit_date: None,
        first_seen: ts(0),
        last_updated: ts(0),
        version: 1,
    }
}

fn branch(project_key: &str, slug: &str, name: &str, is_default: bool) -> BranchRecord {
    BranchRecord {
        data_source: DataSource::BitbucketServer,
        project_key: project_key.into(),
        repo_slug: slug.into(),
        branch_name: name.into(),
        is_default: u8::from(is_default),
        last_commit_hash: String::new(),
        last_commit_date: None,
        last_checked_at: ts(0),
        version: 1,
    }
}

fn commit(project_key: &str, slug: &str, branch: &str, hash: &str, date_ms: i64, parents: &[&str]) -> CommitBundle {
    CommitBundle {
        commit: CommitRecord {
            data_source: DataSource::BitbucketServer,
            project_key: project_key.into(),
            repo_slug: slug.into(),
            commit_hash: hash.into(),
            branch: branch.into(),
            author_name: "dev".into(),
            author_email: "dev@example.com".into(),
            committer_name: "dev".into(),
            committer_email: "dev@example.com".into(),
            message: format!("work on {hash}"),
            date: ts(date_ms),
            parents: json!(parents),
            files_changed: 0,
            lines_added: 0,
            lines_removed: 0,
            is_merge_commit: u8::from(parents.len() > 1),
            language_breakdown: None,
            version: date_ms,
        },
        files: Vec::new(),
        tickets: Vec::new(),
    }
}

fn pull_request(project_key: &str, slug: &str, pr_id: i64, updated_ms: i64) -> PullRequestBundle {
    let created = ts(updated_ms - 1_000);
    let updated = ts(updated_ms);
    PullRequestBundle {
        pull_request: PullRequestRecord {
            data_source: DataSource::BitbucketServer,
            project_key: project_key.into(),
            repo_slug: slug.into(),
            pr_id,
            pr_number: pr_id,
            title: format!("PR {pr_id}"),
            description: String::new(),
            state: insight_etl::model::record::PrState::Open,
            author_name: "dev".into(),
            author_email: String::new(),
            created_on: created,
            updated_on: updated,
            closed_on: None,
            merge_commit_hash: None,
            source_branch: "feature".into(),
            destination_branch: "main".into(),
            commit_count: 2,
            comment_count: 0,
            task_count: 0,
            files_changed: 0,
            lines_added: 0,
            lines_removed: 0,
            duration_seconds: None,
            version: updated_ms,
        },
        reviewers: Vec::new(),
        comments: Vec::new(),
        commits: (0..2)
            .map(|order| PrCommitRecord {
                data_source: DataSource::BitbucketServer,
                project_key: project_key.into(),
                repo_slug: slug.into(),
                pr_id,
                commit_hash: format!("pr{pr_id}c{order}"),
                commit_order: order,
                version: updated_ms,
            })
            .collect(),
        tickets: Vec::new(),
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    sink: Arc<RecordingSink>,
}

fn harness(
    adapter: FakeAdapter,
    watermarks: FakeWatermarks,
    options: CollectOptions,
    batch_size: usize,
) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(10_000_000));
    let sink = Arc::new(RecordingSink::default());
    let batched = BatchedSink::new(sink.clone(), batch_size);
    let orchestrator = Orchestrator::new(
        Arc::new(adapter),
        batched,
        Arc::new(watermarks),
        clock,
        options,
        json!({ "test": true }),
    );
    Harness { orchestrator, sink }
}

fn single_repo_adapter() -> FakeAdapter {
    let mut adapter = FakeAdapter {
        projects: vec![Project::new("TEST")],
        ..Default::default()
    };
    adapter
        .repos
        .insert("TEST".into(), vec![repo("TEST", "test-core")]);
    adapter
        .branches
        .insert("test-core".into(), vec![branch("TEST", "test-core", "main", true)]);
    adapter
}

fn sequential_options() -> CollectOptions {
    CollectOptions {
        max_workers: 1,
        ..CollectOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_run_collects_everything() {
    let adapter = single_repo_adapter();
    adapter.commit_pages.lock().unwrap().insert(
        FakeAdapter::key("test-core", "main"),
        vec![vec![
            commit("TEST", "test-core", "main", "C2", 2_000_000, &["C1"]),
            commit("TEST", "test-core", "main", "C1", 1_000_000, &[]),
        ]],
    );

    let h = harness(adapter, FakeWatermarks::default(), sequential_options(), 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.repos_processed, 1);
    assert_eq!(outcome.stats.commits_collected, 2);
    assert_eq!(outcome.stats.prs_collected, 0);
    assert_eq!(outcome.stats.errors, 0);

    assert_eq!(h.sink.rows_for(Table::Repositories).len(), 1);
    let commits = h.sink.rows_for(Table::Commits);
    assert_eq!(commits.len(), 2);
    assert!(commits.iter().all(|row| row["is_merge_commit"] == 0));

    // Running row first, terminal row second, newer version wins.
    let runs = h.sink.rows_for(Table::CollectionRuns);
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["status"], "running");
    assert_eq!(runs[1]["status"], "completed");
    assert!(runs[1]["_version"].as_i64() > runs[0]["_version"].as_i64());
    assert!(!runs[1]["completed_at"].is_null());
    assert_eq!(runs[1]["commits_collected"], 2);
}

#[tokio::test]
async fn incremental_run_early_stops_before_the_next_page() {
    let adapter = single_repo_adapter();
    adapter.commit_pages.lock().unwrap().insert(
        FakeAdapter::key("test-core", "main"),
        vec![
            vec![
                commit("TEST", "test-core", "main", "C2", 2_000_000, &["C1"]),
                commit("TEST", "test-core", "main", "C1", 1_000_000, &[]),
            ],
            // A second page that must never be requested.
            vec![commit("TEST", "test-core", "main", "C0", 500_000, &[])],
        ],
    );
    let fetches = Arc::clone(&adapter.commit_fetches);

    let mut watermarks = FakeWatermarks::default();
    watermarks.by_repo.insert(
        "test-core".into(),
        Watermarks {
            max_commit_date: Some(ts(1_500_000)),
            max_pr_updated: None,
        },
    );

    let h = harness(adapter, watermarks, sequential_options(), 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.commits_collected, 1);
    let commits = h.sink.rows_for(Table::Commits);
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["commit_hash"], "C2");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn watermark_equal_to_latest_emits_nothing() {
    let adapter = single_repo_adapter();
    adapter.commit_pages.lock().unwrap().insert(
        FakeAdapter::key("test-core", "main"),
        vec![vec![
            commit("TEST", "test-core", "main", "C2", 2_000_000, &[]),
            commit("TEST", "test-core", "main", "C1", 1_000_000, &[]),
        ]],
    );
    let mut watermarks = FakeWatermarks::default();
    watermarks.by_repo.insert(
        "test-core".into(),
        Watermarks {
            max_commit_date: Some(ts(2_000_000)),
            max_pr_updated: None,
        },
    );

    let h = harness(adapter, watermarks, sequential_options(), 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.commits_collected, 0);
    assert_eq!(outcome.stats.errors, 0);
    assert!(h.sink.rows_for(Table::Commits).is_empty());
}

#[tokio::test]
async fn commit_on_two_branches_lands_once_with_the_first_branch() {
    let mut adapter = single_repo_adapter();
    adapter.branches.insert(
        "test-core".into(),
        vec![
            branch("TEST", "test-core", "main", true),
            branch("TEST", "test-core", "develop", false),
        ],
    );
    let shared = commit("TEST", "test-core", "main", "SHARED", 1_000_000, &[]);
    let on_develop = commit("TEST", "test-core", "develop", "SHARED", 1_000_000, &[]);
    adapter
        .commit_pages
        .lock()
        .unwrap()
        .insert(FakeAdapter::key("test-core", "main"), vec![vec![shared]]);
    adapter
        .commit_pages
        .lock()
        .unwrap()
        .insert(FakeAdapter::key("test-core", "develop"), vec![vec![on_develop]]);

    let options = CollectOptions {
        max_workers: 1,
        branches: insight_etl::BranchMode::All,
        ..CollectOptions::default()
    };
    let h = harness(adapter, FakeWatermarks::default(), options, 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.stats.commits_collected, 1);
    let commits = h.sink.rows_for(Table::Commits);
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["branch"], "main");
}

#[tokio::test]
async fn pull_requests_emit_children_with_contiguous_order() {
    let adapter = single_repo_adapter();
    adapter
        .pr_pages
        .lock()
        .unwrap()
        .insert("test-core".into(), vec![vec![pull_request("TEST", "test-core", 42, 3_000_000)]]);

    let h = harness(adapter, FakeWatermarks::default(), sequential_options(), 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.stats.prs_collected, 1);
    let links = h.sink.rows_for(Table::PrCommits);
    let mut orders: Vec<i64> = links
        .iter()
        .map(|row| row["commit_order"].as_i64().unwrap())
        .collect();
    orders.sort_unstable();
    assert_eq!(orders, vec![0, 1]);
}

#[tokio::test]
async fn repository_failure_is_isolated_and_counted() {
    let mut adapter = FakeAdapter {
        projects: vec![Project::new("TEST")],
        fail_branches_for: Some("broken".into()),
        ..Default::default()
    };
    adapter.repos.insert(
        "TEST".into(),
        vec![repo("TEST", "broken"), repo("TEST", "healthy")],
    );
    adapter
        .branches
        .insert("healthy".into(), vec![branch("TEST", "healthy", "main", true)]);
    adapter.commit_pages.lock().unwrap().insert(
        FakeAdapter::key("healthy", "main"),
        vec![vec![commit("TEST", "healthy", "main", "H1", 1_000_000, &[])]],
    );

    let h = harness(adapter, FakeWatermarks::default(), sequential_options(), 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    // The broken repository is skipped; the run still completes.
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.repos_processed, 1);
    assert_eq!(outcome.stats.errors, 1);
    assert_eq!(outcome.stats.commits_collected, 1);
    assert_eq!(h.sink.rows_for(Table::Repositories).len(), 2);
}

#[tokio::test]
async fn empty_repository_emits_only_the_repository_row() {
    let mut adapter = FakeAdapter {
        projects: vec![Project::new("TEST")],
        ..Default::default()
    };
    let mut empty = repo("TEST", "empty");
    empty.is_empty = 1;
    adapter.repos.insert("TEST".into(), vec![empty]);

    let h = harness(adapter, FakeWatermarks::default(), sequential_options(), 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.repos_processed, 1);
    let repos = h.sink.rows_for(Table::Repositories);
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0]["is_empty"], 1);
    assert!(h.sink.rows_for(Table::Commits).is_empty());
}

#[tokio::test]
async fn cancellation_mid_page_discards_the_page_and_fails_the_run() {
    let adapter = single_repo_adapter();
    let hook = Arc::clone(&adapter.cancel_on_commit_fetch);
    adapter.commit_pages.lock().unwrap().insert(
        FakeAdapter::key("test-core", "main"),
        vec![vec![commit("TEST", "test-core", "main", "C1", 1_000_000, &[])]],
    );

    let h = harness(adapter, FakeWatermarks::default(), sequential_options(), 1_000);
    // The page fetch raises the orchestrator's own cancellation flag, as an
    // interrupt landing while the request is in flight would.
    *hook.lock().unwrap() = Some(h.orchestrator.cancel_flag());

    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    // No records from the aborted page were emitted, and the failed run
    // persisted no partial data that could advance the watermarks.
    assert!(h.sink.rows_for(Table::Commits).is_empty());
    assert!(h.sink.rows_for(Table::Repositories).is_empty());
    assert!(h.sink.rows_for(Table::Branches).is_empty());
    let runs = h.sink.rows_for(Table::CollectionRuns);
    assert_eq!(runs.last().unwrap()["status"], "failed");
    assert!(!runs.last().unwrap()["completed_at"].is_null());
}

#[tokio::test]
async fn parallel_fanout_collects_all_repositories() {
    let mut adapter = FakeAdapter {
        projects: vec![Project::new("TEST")],
        ..Default::default()
    };
    adapter.repos.insert(
        "TEST".into(),
        vec![repo("TEST", "alpha"), repo("TEST", "beta"), repo("TEST", "gamma")],
    );
    for slug in ["alpha", "beta", "gamma"] {
        adapter
            .branches
            .insert(slug.into(), vec![branch("TEST", slug, "main", true)]);
        adapter.commit_pages.lock().unwrap().insert(
            FakeAdapter::key(slug, "main"),
            vec![vec![commit("TEST", slug, "main", &format!("{slug}-1"), 1_000_000, &[])]],
        );
    }

    let options = CollectOptions {
        max_workers: 2,
        ..CollectOptions::default()
    };
    let h = harness(adapter, FakeWatermarks::default(), options, 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.repos_processed, 3);
    assert_eq!(outcome.stats.commits_collected, 3);
    assert_eq!(h.sink.rows_for(Table::Commits).len(), 3);
}

#[tokio::test]
async fn repository_filter_restricts_collection() {
    let mut adapter = FakeAdapter {
        projects: vec![Project::new("TEST")],
        ..Default::default()
    };
    adapter.repos.insert(
        "TEST".into(),
        vec![repo("TEST", "wanted"), repo("TEST", "ignored")],
    );
    adapter
        .branches
        .insert("wanted".into(), vec![branch("TEST", "wanted", "main", true)]);
    adapter.commit_pages.lock().unwrap().insert(
        FakeAdapter::key("wanted", "main"),
        vec![vec![commit("TEST", "wanted", "main", "W1", 1_000_000, &[])]],
    );

    let options = CollectOptions {
        max_workers: 1,
        repositories: vec!["TEST/wanted".into()],
        ..CollectOptions::default()
    };
    let h = harness(adapter, FakeWatermarks::default(), options, 1_000);
    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.stats.repos_processed, 1);
    assert_eq!(h.sink.rows_for(Table::Repositories).len(), 1);
    assert_eq!(h.sink.rows_for(Table::Commits).len(), 1);
}
