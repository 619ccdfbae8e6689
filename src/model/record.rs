use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EtlResult;
use crate::model::source::DataSource;
use crate::model::time::{ts_ms, ts_ms_opt};

// ---------------------------------------------------------------------------
// Destination tables
// ---------------------------------------------------------------------------

/// The destination tables of the analytical store. Order in `FLUSH_ORDER`
/// is the dependency order for `flush_all`: parents land before children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Repositories,
    Branches,
    Commits,
    CommitFiles,
    PullRequests,
    PrReviewers,
    PrComments,
    PrCommits,
    Tickets,
    CollectionRuns,
}

impl Table {
    pub const FLUSH_ORDER: [Table; 10] = [
        Table::Repositories,
        Table::Branches,
        Table::Commits,
        Table::CommitFiles,
        Table::PullRequests,
        Table::PrReviewers,
        Table::PrComments,
        Table::PrCommits,
        Table::Tickets,
        Table::CollectionRuns,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Repositories => "insight_repositories",
            Table::Branches => "insight_branches",
            Table::Commits => "insight_commits",
            Table::CommitFiles => "insight_commit_files",
            Table::PullRequests => "insight_pull_requests",
            Table::PrReviewers => "insight_pr_reviewers",
            Table::PrComments => "insight_pr_comments",
            Table::PrCommits => "insight_pr_commits",
            Table::Tickets => "insight_tickets",
            Table::CollectionRuns => "collection_runs",
        }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A repository, re-upserted on every run it is seen in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub name: String,
    pub uuid: Option<String>,
    pub is_private: u8,
    pub is_empty: u8,
    /// Bitbucket-only, currently never populated by an adapter.
    pub fork_policy: Option<String>,
    pub size_bytes: Option<i64>,
    pub language: Option<String>,
    pub has_issues: Option<u8>,
    pub has_wiki: Option<u8>,
    #[serde(with = "ts_ms_opt")]
    pub last_commit_date: Option<DateTime<Utc>>,
    #[serde(with = "ts_ms")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "ts_ms")]
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "_version")]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub branch_name: String,
    pub is_default: u8,
    pub last_commit_hash: String,
    #[serde(with = "ts_ms_opt")]
    pub last_commit_date: Option<DateTime<Utc>>,
    #[serde(with = "ts_ms")]
    pub last_checked_at: DateTime<Utc>,
    #[serde(rename = "_version")]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub commit_hash: String,
    /// The branch that was being walked when this commit was first seen.
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub message: String,
    #[serde(with = "ts_ms")]
    pub date: DateTime<Utc>,
    /// JSON array: full parent objects on Bitbucket, SHA strings on GitHub.
    /// Consumers read only `id`/`sha`.
    pub parents: Value,
    pub files_changed: i64,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub is_merge_commit: u8,
    pub language_breakdown: Option<Value>,
    #[serde(rename = "_version")]
    pub version: i64,
}

/// `is_merge_commit` is derived from the parent count, never taken from the
/// upstream.
pub fn merge_flag(parent_count: usize) -> u8 {
    u8::from(parent_count > 1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFileRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub commit_hash: String,
    pub file_path: String,
    /// SHA-256 hex of the diff content.
    pub diff_hash: String,
    pub extension: String,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub is_third_party: Option<u8>,
    /// Scancode output carried through untouched.
    pub scancode_metadata: Option<Value>,
    #[serde(rename = "_version")]
    pub version: i64,
}

/// SHA-256 hex digest of a diff body.
pub fn diff_hash(diff: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// File extension without the dot, lowercased; empty when there is none.
pub fn file_extension(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Unified pull-request state across upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrState {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "MERGED")]
    Merged,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "DECLINED")]
    Declined,
}

impl PrState {
    /// GitHub: the `merged` flag wins, then `state` maps to OPEN/CLOSED.
    pub fn from_github(merged: bool, state: &str) -> Self {
        if merged {
            PrState::Merged
        } else if state.eq_ignore_ascii_case("open") {
            PrState::Open
        } else {
            PrState::Closed
        }
    }

    /// Bitbucket uses the unified names directly.
    pub fn from_bitbucket(state: &str) -> Self {
        match state {
            "MERGED" => PrState::Merged,
            "DECLINED" => PrState::Declined,
            "OPEN" => PrState::Open,
            _ => PrState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrState::Open => "OPEN",
            PrState::Merged => "MERGED",
            PrState::Closed => "CLOSED",
            PrState::Declined => "DECLINED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    /// GitHub `databaseId`; equals `pr_number` on Bitbucket.
    pub pr_id: i64,
    pub pr_number: i64,
    pub title: String,
    pub description: String,
    pub state: PrState,
    pub author_name: String,
    /// Empty when the upstream does not expose it (GitHub users).
    pub author_email: String,
    #[serde(with = "ts_ms")]
    pub created_on: DateTime<Utc>,
    #[serde(with = "ts_ms")]
    pub updated_on: DateTime<Utc>,
    #[serde(with = "ts_ms_opt")]
    pub closed_on: Option<DateTime<Utc>>,
    pub merge_commit_hash: Option<String>,
    pub source_branch: String,
    pub destination_branch: String,
    pub commit_count: i64,
    pub comment_count: i64,
    pub task_count: i64,
    pub files_changed: i64,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub duration_seconds: Option<i64>,
    #[serde(rename = "_version")]
    pub version: i64,
}

/// Whole seconds a PR stayed open; None while it still is.
pub fn pr_duration_seconds(
    created_on: DateTime<Utc>,
    closed_on: Option<DateTime<Utc>>,
) -> Option<i64> {
    closed_on.map(|closed| (closed - created_on).num_seconds())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub pr_id: i64,
    pub reviewer_uuid: String,
    pub name: String,
    /// Empty for GitHub reviewers.
    pub email: String,
    /// Preserved verbatim; GitHub sometimes serves lowercase states.
    pub status: String,
    pub role: String,
    pub approved: u8,
    #[serde(with = "ts_ms_opt")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(rename = "_version")]
    pub version: i64,
}

/// Both casings count; the verbatim status is stored alongside.
pub fn approved_flag(status: &str) -> u8 {
    u8::from(status == "APPROVED" || status == "approved")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrCommentRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub pr_id: i64,
    pub comment_id: i64,
    pub content: String,
    pub author_name: String,
    pub author_email: String,
    #[serde(with = "ts_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_ms_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub severity: Option<String>,
    pub thread_resolved: Option<u8>,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    #[serde(rename = "_version")]
    pub version: i64,
}

/// Link row tying a commit into a pull request; `commit_order` preserves
/// the API response order, 0-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrCommitRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub pr_id: i64,
    pub commit_hash: String,
    pub commit_order: i64,
    #[serde(rename = "_version")]
    pub version: i64,
}

/// A Jira ticket reference found on a PR or a commit, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    pub data_source: DataSource,
    pub project_key: String,
    pub repo_slug: String,
    pub external_ticket_id: String,
    pub pr_id: i64,
    pub commit_hash: String,
    #[serde(rename = "_version")]
    pub version: i64,
}

impl TicketRecord {
    pub fn for_pr(
        data_source: DataSource,
        project_key: impl Into<String>,
        repo_slug: impl Into<String>,
        ticket_id: impl Into<String>,
        pr_id: i64,
        version: i64,
    ) -> Self {
        Self {
            data_source,
            project_key: project_key.into(),
            repo_slug: repo_slug.into(),
            external_ticket_id: ticket_id.into(),
            pr_id,
            commit_hash: String::new(),
            version,
        }
    }

    pub fn for_commit(
        data_source: DataSource,
        project_key: impl Into<String>,
        repo_slug: impl Into<String>,
        ticket_id: impl Into<String>,
        commit_hash: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            data_source,
            project_key: project_key.into(),
            repo_slug: repo_slug.into(),
            external_ticket_id: ticket_id.into(),
            pr_id: 0,
            commit_hash: commit_hash.into(),
            version,
        }
    }
}

/// Lifecycle states of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRunRecord {
    pub run_id: String,
    pub data_source: DataSource,
    #[serde(with = "ts_ms")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "ts_ms_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub repos_processed: u64,
    pub commits_collected: u64,
    pub prs_collected: u64,
    pub api_calls: u64,
    pub errors: u64,
    pub settings: Value,
    #[serde(rename = "_version")]
    pub version: i64,
}

// ---------------------------------------------------------------------------
// Record: the tagged shape pushed into the sink
// ---------------------------------------------------------------------------

/// One row on its way to the sink, tagged with its destination table.
#[derive(Debug, Clone)]
pub enum Record {
    Repository(RepositoryRecord),
    Branch(BranchRecord),
    Commit(CommitRecord),
    CommitFile(CommitFileRecord),
    PullRequest(PullRequestRecord),
    Reviewer(ReviewerRecord),
    PrComment(PrCommentRecord),
    PrCommit(PrCommitRecord),
    Ticket(TicketRecord),
    CollectionRun(CollectionRunRecord),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Repository(_) => Table::Repositories,
            Record::Branch(_) => Table::Branches,
            Record::Commit(_) => Table::Commits,
            Record::CommitFile(_) => Table::CommitFiles,
            Record::PullRequest(_) => Table::PullRequests,
            Record::Reviewer(_) => Table::PrReviewers,
            Record::PrComment(_) => Table::PrComments,
            Record::PrCommit(_) => Table::PrCommits,
            Record::Ticket(_) => Table::Tickets,
            Record::CollectionRun(_) => Table::CollectionRuns,
        }
    }

    /// Serialize into the row JSON the sink batches.
    pub fn into_row(self) -> EtlResult<Value> {
        let row = match self {
            Record::Repository(r) => serde_json::to_value(r)?,
            Record::Branch(r) => serde_json::to_value(r)?,
            Record::Commit(r) => serde_json::to_value(r)?,
            Record::CommitFile(r) => serde_json::to_value(r)?,
            Record::PullRequest(r) => serde_json::to_value(r)?,
            Record::Reviewer(r) => serde_json::to_value(r)?,
            Record::PrComment(r) => serde_json::to_value(r)?,
            Record::PrCommit(r) => serde_json::to_value(r)?,
            Record::Ticket(r) => serde_json::to_value(r)?,
            Record::CollectionRun(r) => serde_json::to_value(r)?,
        };
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::parse_iso8601;

    #[test]
    fn merge_flag_follows_parent_count() {
        assert_eq!(merge_flag(0), 0);
        assert_eq!(merge_flag(1), 0);
        assert_eq!(merge_flag(2), 1);
        assert_eq!(merge_flag(3), 1);
    }

    #[test]
    fn duration_matches_merged_pr_scenario() {
        let created = parse_iso8601("2025-11-17T19:45:14Z").unwrap();
        let closed = parse_iso8601("2025-11-22T10:07:07Z").unwrap();
        assert_eq!(pr_duration_seconds(created, Some(closed)), Some(397_313));
        assert_eq!(pr_duration_seconds(created, None), None);
    }

    #[test]
    fn approved_accepts_both_casings() {
        assert_eq!(approved_flag("APPROVED"), 1);
        assert_eq!(approved_flag("approved"), 1);
        assert_eq!(approved_flag("CHANGES_REQUESTED"), 0);
        assert_eq!(approved_flag("Approved"), 0);
    }

    #[test]
    fn github_state_mapping() {
        assert_eq!(PrState::from_github(true, "closed"), PrState::Merged);
        assert_eq!(PrState::from_github(false, "open"), PrState::Open);
        assert_eq!(PrState::from_github(false, "OPEN"), PrState::Open);
        assert_eq!(PrState::from_github(false, "closed"), PrState::Closed);
    }

    #[test]
    fn bitbucket_state_mapping() {
        assert_eq!(PrState::from_bitbucket("OPEN"), PrState::Open);
        assert_eq!(PrState::from_bitbucket("MERGED"), PrState::Merged);
        assert_eq!(PrState::from_bitbucket("DECLINED"), PrState::Declined);
    }

    #[test]
    fn ticket_constructors_keep_the_xor() {
        let pr = TicketRecord::for_pr(DataSource::GitHub, "ORG", "repo", "PLTFRM-84867", 42, 1);
        assert!(pr.pr_id > 0 && pr.commit_hash.is_empty());

        let commit =
            TicketRecord::for_commit(DataSource::GitHub, "ORG", "repo", "CORE-1", "abc123", 1);
        assert!(commit.pr_id == 0 && !commit.commit_hash.is_empty());
    }

    #[test]
    fn flush_order_covers_every_table_parents_first() {
        assert_eq!(Table::FLUSH_ORDER.len(), 10);
        assert_eq!(Table::FLUSH_ORDER[0], Table::Repositories);
        assert_eq!(Table::FLUSH_ORDER[9], Table::CollectionRuns);
        let position = |t: Table| Table::FLUSH_ORDER.iter().position(|x| *x == t).unwrap();
        assert!(position(Table::Commits) < position(Table::CommitFiles));
        assert!(position(Table::PullRequests) < position(Table::PrCommits));
    }

    #[test]
    fn extension_is_lowercased_without_dot() {
        assert_eq!(file_extension("src/lib.RS"), "rs");
        assert_eq!(file_extension("Makefile"), "");
        assert_eq!(file_extension("a/b/c.tar.gz"), "gz");
    }

    #[test]
    fn version_column_serializes_with_underscore() {
        let ticket = TicketRecord::for_pr(DataSource::GitHub, "ORG", "repo", "CORE-1", 1, 123);
        let row = Record::Ticket(ticket).into_row().unwrap();
        assert_eq!(row["_version"], 123);
        assert_eq!(row["data_source"], "insight_github");
    }

    #[test]
    fn diff_hash_is_hex_sha256() {
        let hash = diff_hash("+line\n-line\n");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, diff_hash("+line\n-line\n"));
        assert_ne!(hash, diff_hash("+other\n"));
    }
}
