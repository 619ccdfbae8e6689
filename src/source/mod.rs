use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EtlConfig, SourceKind};
use crate::error::{EtlError, EtlResult};
use crate::model::clock::Clock;
use crate::model::record::{
    BranchRecord, CommitFileRecord, CommitRecord, PrCommentRecord, PrCommitRecord,
    PullRequestRecord, RepositoryRecord, ReviewerRecord, TicketRecord,
};
use crate::model::source::{DataSource, Project};
use crate::net::{Paged, RateLimitState, RateLimiter, UpstreamClient};

pub mod bitbucket;
pub mod github;

pub use bitbucket::BitbucketAdapter;
pub use github::GithubAdapter;

// ---------------------------------------------------------------------------
// SourceAdapter: the common capability set every upstream implements
// ---------------------------------------------------------------------------

/// What an adapter can do natively, so the orchestrator never branches on
/// the upstream kind.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    /// The cheap bulk path (GraphQL) is active for this adapter instance.
    pub bulk: bool,
    /// Commit bundles already carry file rows and line stats; when false the
    /// orchestrator must call `stream_commit_files` per commit.
    pub inline_commit_files: bool,
}

/// Which nested PR payloads to collect. Mirrors the feature gates in the
/// run configuration.
#[derive(Debug, Clone, Copy)]
pub struct CollectGates {
    pub reviews: bool,
    pub comments: bool,
}

impl Default for CollectGates {
    fn default() -> Self {
        Self {
            reviews: true,
            comments: true,
        }
    }
}

/// A commit plus whatever arrived with it: inline file rows (GitHub) and
/// tickets extracted from the message.
#[derive(Debug, Clone)]
pub struct CommitBundle {
    pub commit: CommitRecord,
    pub files: Vec<CommitFileRecord>,
    pub tickets: Vec<TicketRecord>,
}

/// A pull request plus its nested children, mapped and ticket-extracted.
#[derive(Debug, Clone)]
pub struct PullRequestBundle {
    pub pull_request: PullRequestRecord,
    pub reviewers: Vec<ReviewerRecord>,
    pub comments: Vec<PrCommentRecord>,
    pub commits: Vec<PrCommitRecord>,
    pub tickets: Vec<TicketRecord>,
}

/// Per-upstream implementation of the collection capability set. All
/// streams are finite, single-pass, and ordered newest-first on the field
/// the watermark compares against, so early stopping is correct.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn data_source(&self) -> DataSource;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Physical HTTP requests issued so far (for run statistics).
    fn api_calls(&self) -> u64;

    /// Records dropped by the field mapper since the last call. Mapping
    /// failures never abort a stream; they are drained here per repository.
    fn take_mapping_errors(&self) -> u64;

    /// GitHub serves a single virtual project: the organization.
    async fn list_projects(&self) -> EtlResult<Vec<Project>>;

    async fn list_repositories(&self, project: &Project) -> EtlResult<Vec<RepositoryRecord>>;

    /// All branches of a repository, exactly one marked default.
    async fn list_branches(&self, project_key: &str, repo_slug: &str)
        -> EtlResult<Vec<BranchRecord>>;

    /// Commits on a branch, newest-first, optionally bounded below by
    /// `since`.
    async fn stream_commits(
        &self,
        project_key: &str,
        repo_slug: &str,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<Paged<CommitBundle>>;

    /// Per-commit file rows for upstreams that need an extra call
    /// (Bitbucket's diff endpoint). Adapters with inline file stats never
    /// see this called.
    async fn stream_commit_files(
        &self,
        project_key: &str,
        repo_slug: &str,
        commit_hash: &str,
    ) -> EtlResult<Vec<CommitFileRecord>>;

    /// Pull requests with nested reviews, comments, and commit links,
    /// newest-first by `updated_on`.
    async fn stream_pull_requests(
        &self,
        project_key: &str,
        repo_slug: &str,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<Paged<PullRequestBundle>>;
}

// ---------------------------------------------------------------------------
// Adapter construction
// ---------------------------------------------------------------------------

/// Build the adapter for the configured upstream, with a fresh per-upstream
/// rate-limit state wired through its HTTP client.
pub fn create_adapter(
    config: &EtlConfig,
    clock: Arc<dyn Clock>,
) -> EtlResult<Arc<dyn SourceAdapter>> {
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(RateLimitState::new()),
        Arc::clone(&clock),
        config.upstream.max_retries,
    ));
    let accept = match config.upstream.kind {
        SourceKind::Github => Some("application/vnd.github.v3+json"),
        _ => None,
    };
    let client = UpstreamClient::new(
        &config.upstream.url,
        &config.upstream.token,
        accept,
        Duration::from_secs(config.upstream.timeout_secs),
        limiter,
    )?;
    let gates = CollectGates {
        reviews: config.collect.reviews,
        comments: config.collect.comments,
    };
    let data_source = config.data_source();

    match config.upstream.kind {
        SourceKind::BitbucketServer => Ok(Arc::new(BitbucketAdapter::new(
            client,
            clock,
            data_source,
            gates,
        ))),
        SourceKind::Github => {
            let owner = config
                .upstream
                .owner
                .clone()
                .ok_or_else(|| EtlError::Config("upstream.owner is required for GitHub".into()))?;
            Ok(Arc::new(GithubAdapter::new(
                client,
                clock,
                data_source,
                gates,
                owner,
                &config.upstream.url,
                config.upstream.use_graphql,
            )))
        }
        SourceKind::Gitlab | SourceKind::CustomGit => Err(EtlError::Config(format!(
            "no adapter is available yet for {:?}",
            config.upstream.kind
        ))),
    }
}
