use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{EtlError, EtlResult};
use crate::model::record::{
    self, BranchRecord, CommitFileRecord, CommitRecord, PrCommentRecord, PrCommitRecord,
    PullRequestRecord, RepositoryRecord, ReviewerRecord,
};
use crate::model::source::Project;
use crate::model::time;
use crate::net::page::{Page, PageCursor, PageFetcher, Paged};
use crate::net::{DEFAULT_PAGE_SIZE, PR_PAGE_SIZE};
use crate::source::{CommitBundle, PullRequestBundle};

use super::{commit_tickets, opt_str, pr_tickets, str_or_empty, Ctx};

// ---------------------------------------------------------------------------
// REST fallback: one list call plus per-item detail calls
// ---------------------------------------------------------------------------

/// Drain a page-numbered REST listing. GitHub REST paginates with `page`;
/// a short page terminates the walk.
async fn fetch_all_pages(
    ctx: &Ctx,
    path: &str,
    extra: &[(&str, String)],
    per_page: u32,
) -> EtlResult<Vec<Value>> {
    let mut items = Vec::new();
    let mut page: u64 = 1;
    loop {
        let mut query: Vec<(&str, String)> = vec![
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        query.extend(extra.iter().cloned());
        let body = ctx.client.get_json(path, &query).await?;
        let values = body
            .as_array()
            .ok_or_else(|| EtlError::Mapping(format!("expected array from {path}")))?;
        let len = values.len();
        items.extend(values.iter().cloned());
        if (len as u32) < per_page {
            return Ok(items);
        }
        page += 1;
    }
}

pub(super) async fn list_repositories(
    ctx: &Ctx,
    project: &Project,
) -> EtlResult<Vec<RepositoryRecord>> {
    let path = format!("orgs/{}/repos", ctx.owner);
    let values = fetch_all_pages(ctx, &path, &[], DEFAULT_PAGE_SIZE).await?;
    let mut repos = Vec::with_capacity(values.len());
    for value in &values {
        match map_repository(ctx, &project.key, value) {
            Ok(repo) => repos.push(repo),
            Err(err) => ctx.drop_record("repository", &err),
        }
    }
    Ok(repos)
}

pub(super) async fn list_branches(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
) -> EtlResult<Vec<BranchRecord>> {
    let repo = ctx
        .client
        .get_json(&format!("repos/{}/{repo_slug}", ctx.owner), &[])
        .await?;
    let default_branch = repo
        .get("default_branch")
        .and_then(Value::as_str)
        .unwrap_or("main")
        .to_string();

    let path = format!("repos/{}/{repo_slug}/branches", ctx.owner);
    let values = fetch_all_pages(ctx, &path, &[], DEFAULT_PAGE_SIZE).await?;
    let mut branches = Vec::with_capacity(values.len());
    for value in &values {
        let Some(name) = value.get("name").and_then(Value::as_str) else {
            ctx.drop_record("branch", &EtlError::Mapping("branch without name".into()));
            continue;
        };
        branches.push(BranchRecord {
            data_source: ctx.data_source.clone(),
            project_key: project_key.to_string(),
            repo_slug: repo_slug.to_string(),
            branch_name: name.to_string(),
            is_default: u8::from(name == default_branch),
            last_commit_hash: value
                .pointer("/commit/sha")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            last_commit_date: None,
            last_checked_at: ctx.clock.now(),
            version: ctx.clock.now_ms(),
        });
    }
    Ok(branches)
}

pub(super) fn commit_stream(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    branch: &str,
    since: Option<DateTime<Utc>>,
) -> Paged<CommitBundle> {
    Paged::new(Box::new(CommitFetcher {
        ctx: ctx.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        branch: branch.to_string(),
        since,
    }))
}

pub(super) fn pull_request_stream(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    _since: Option<DateTime<Utc>>,
) -> Paged<PullRequestBundle> {
    Paged::new(Box::new(PullRequestFetcher {
        ctx: ctx.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
    }))
}

struct CommitFetcher {
    ctx: Ctx,
    project_key: String,
    repo_slug: String,
    branch: String,
    since: Option<DateTime<Utc>>,
}

#[async_trait]
impl PageFetcher<CommitBundle> for CommitFetcher {
    async fn fetch(&mut self, cursor: &PageCursor) -> EtlResult<Page<CommitBundle>> {
        let page = match cursor {
            PageCursor::Offset(page) => *page,
            _ => 1,
        };
        let path = format!("repos/{}/{}/commits", self.ctx.owner, self.repo_slug);
        let mut query = vec![
            ("sha", self.branch.clone()),
            ("per_page", DEFAULT_PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(since) = self.since {
            query.push((
                "since",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        let body = self.ctx.client.get_json(&path, &query).await?;
        let values = body
            .as_array()
            .cloned()
            .ok_or_else(|| EtlError::Mapping("expected commit array".into()))?;
        let len = values.len() as u32;

        // The expensive fallback: one detail call per commit for stats and
        // file rows.
        let mut items = Vec::with_capacity(values.len());
        for value in &values {
            let Some(sha) = value.get("sha").and_then(Value::as_str) else {
                self.ctx
                    .drop_record("commit", &EtlError::Mapping("commit without sha".into()));
                continue;
            };
            let detail = self
                .ctx
                .client
                .get_json(
                    &format!("repos/{}/{}/commits/{sha}", self.ctx.owner, self.repo_slug),
                    &[],
                )
                .await?;
            match map_commit_detail(
                &self.ctx,
                &self.project_key,
                &self.repo_slug,
                &self.branch,
                &detail,
            ) {
                Ok(bundle) => items.push(bundle),
                Err(err) => self.ctx.drop_record("commit", &err),
            }
        }
        let next = (len == DEFAULT_PAGE_SIZE).then_some(PageCursor::Offset(page + 1));
        Ok(Page { items, next })
    }
}

struct PullRequestFetcher {
    ctx: Ctx,
    project_key: String,
    repo_slug: String,
}

#[async_trait]
impl PageFetcher<PullRequestBundle> for PullRequestFetcher {
    async fn fetch(&mut self, cursor: &PageCursor) -> EtlResult<Page<PullRequestBundle>> {
        let page = match cursor {
            PageCursor::Offset(page) => *page,
            _ => 1,
        };
        let path = format!("repos/{}/{}/pulls", self.ctx.owner, self.repo_slug);
        let query = [
            ("state", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", PR_PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        let body = self.ctx.client.get_json(&path, &query).await?;
        let values = body
            .as_array()
            .cloned()
            .ok_or_else(|| EtlError::Mapping("expected pull request array".into()))?;
        let len = values.len() as u32;

        let mut items = Vec::with_capacity(values.len());
        for value in &values {
            match self.assemble(value).await {
                Ok(bundle) => items.push(bundle),
                Err(err) if matches!(err, EtlError::Mapping(_)) => {
                    self.ctx.drop_record("pull_request", &err)
                }
                Err(err) => return Err(err),
            }
        }
        let next = (len == PR_PAGE_SIZE).then_some(PageCursor::Offset(page + 1));
        Ok(Page { items, next })
    }
}

impl PullRequestFetcher {
    async fn assemble(&self, value: &Value) -> EtlResult<PullRequestBundle> {
        let number = value
            .get("number")
            .and_then(Value::as_i64)
            .ok_or_else(|| EtlError::Mapping("pull request without number".into()))?;
        let base = format!("repos/{}/{}", self.ctx.owner, self.repo_slug);

        // The list payload omits stats; the detail call carries them.
        let detail = self
            .ctx
            .client
            .get_json(&format!("{base}/pulls/{number}"), &[])
            .await?;
        let mut pr = map_pull_request(&self.ctx, &self.project_key, &self.repo_slug, &detail)?;

        let version = pr.version;
        let reviewers = if self.ctx.gates.reviews {
            let reviews =
                fetch_all_pages(&self.ctx, &format!("{base}/pulls/{number}/reviews"), &[], 100)
                    .await?;
            reviews
                .iter()
                .filter_map(|review| {
                    map_reviewer(
                        &self.ctx,
                        &self.project_key,
                        &self.repo_slug,
                        pr.pr_id,
                        review,
                        version,
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut comments = Vec::new();
        if self.ctx.gates.comments {
            let general =
                fetch_all_pages(&self.ctx, &format!("{base}/issues/{number}/comments"), &[], 100)
                    .await?;
            let inline =
                fetch_all_pages(&self.ctx, &format!("{base}/pulls/{number}/comments"), &[], 100)
                    .await?;
            for comment in general.iter().chain(inline.iter()) {
                match map_comment(
                    &self.ctx,
                    &self.project_key,
                    &self.repo_slug,
                    pr.pr_id,
                    comment,
                    version,
                ) {
                    Some(comment) => comments.push(comment),
                    None => self.ctx.drop_record(
                        "pr_comment",
                        &EtlError::Mapping("comment missing id or timestamp".into()),
                    ),
                }
            }
        }

        let commit_values =
            fetch_all_pages(&self.ctx, &format!("{base}/pulls/{number}/commits"), &[], 100)
                .await?;
        let commits: Vec<PrCommitRecord> = commit_values
            .iter()
            .enumerate()
            .filter_map(|(order, commit)| {
                let sha = commit.get("sha").and_then(Value::as_str)?;
                Some(PrCommitRecord {
                    data_source: self.ctx.data_source.clone(),
                    project_key: self.project_key.clone(),
                    repo_slug: self.repo_slug.clone(),
                    pr_id: pr.pr_id,
                    commit_hash: sha.to_string(),
                    commit_order: order as i64,
                    version,
                })
            })
            .collect();
        if pr.commit_count == 0 {
            pr.commit_count = commits.len() as i64;
        }

        let tickets = pr_tickets(
            &self.ctx,
            &self.project_key,
            &self.repo_slug,
            pr.pr_id,
            &pr.title,
            &pr.description,
            version,
        );

        Ok(PullRequestBundle {
            pull_request: pr,
            reviewers,
            comments,
            commits,
            tickets,
        })
    }
}

pub(super) async fn commit_files(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    commit_hash: &str,
) -> EtlResult<Vec<CommitFileRecord>> {
    let detail = ctx
        .client
        .get_json(
            &format!("repos/{}/{repo_slug}/commits/{commit_hash}", ctx.owner),
            &[],
        )
        .await?;
    let version = ctx.clock.now_ms();
    Ok(map_files(
        ctx,
        project_key,
        repo_slug,
        commit_hash,
        &detail,
        version,
    ))
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

fn map_repository(ctx: &Ctx, project_key: &str, value: &Value) -> EtlResult<RepositoryRecord> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| EtlError::Mapping("repository without name".into()))?;
    let now = ctx.clock.now();
    let last_commit_date = value
        .get("pushed_at")
        .and_then(Value::as_str)
        .map(time::parse_iso8601)
        .transpose()?;
    Ok(RepositoryRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: name.to_string(),
        name: name.to_string(),
        uuid: value.get("node_id").and_then(Value::as_str).map(str::to_string),
        is_private: u8::from(value.get("private").and_then(Value::as_bool).unwrap_or(true)),
        is_empty: 0,
        fork_policy: None,
        // REST reports size in kilobytes.
        size_bytes: value.get("size").and_then(Value::as_i64).map(|kb| kb * 1024),
        language: opt_str(value, "language"),
        has_issues: value
            .get("has_issues")
            .and_then(Value::as_bool)
            .map(u8::from),
        has_wiki: value.get("has_wiki").and_then(Value::as_bool).map(u8::from),
        last_commit_date,
        first_seen: now,
        last_updated: now,
        version: ctx.clock.now_ms(),
    })
}

/// Map a commit detail payload: header, stats, and per-file rows in one.
fn map_commit_detail(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    branch: &str,
    detail: &Value,
) -> EtlResult<CommitBundle> {
    let sha = detail
        .get("sha")
        .and_then(Value::as_str)
        .ok_or_else(|| EtlError::Mapping("commit without sha".into()))?;
    let header = detail
        .get("commit")
        .ok_or_else(|| EtlError::Mapping("commit without header".into()))?;
    let date = time::parse_iso8601(
        header
            .pointer("/committer/date")
            .or_else(|| header.pointer("/author/date"))
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::Mapping("commit without date".into()))?,
    )?;
    let message = str_or_empty(header, "message");

    let parent_shas: Vec<Value> = detail
        .get("parents")
        .and_then(Value::as_array)
        .map(|parents| {
            parents
                .iter()
                .filter_map(|p| p.get("sha").and_then(Value::as_str))
                .map(|sha| Value::String(sha.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let parent_count = parent_shas.len();
    let version = ctx.clock.now_ms();

    let files = map_files(ctx, project_key, repo_slug, sha, detail, version);

    let commit = CommitRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        commit_hash: sha.to_string(),
        branch: branch.to_string(),
        author_name: header
            .pointer("/author/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        author_email: header
            .pointer("/author/email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        committer_name: header
            .pointer("/committer/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        committer_email: header
            .pointer("/committer/email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        message: message.clone(),
        date,
        parents: Value::Array(parent_shas),
        files_changed: files.len() as i64,
        lines_added: detail
            .pointer("/stats/additions")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        lines_removed: detail
            .pointer("/stats/deletions")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        is_merge_commit: record::merge_flag(parent_count),
        language_breakdown: None,
        version,
    };

    let tickets = commit_tickets(ctx, project_key, repo_slug, sha, &message, version);

    Ok(CommitBundle {
        commit,
        files,
        tickets,
    })
}

fn map_files(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    commit_hash: &str,
    detail: &Value,
    version: i64,
) -> Vec<CommitFileRecord> {
    let empty = Vec::new();
    detail
        .get("files")
        .and_then(Value::as_array)
        .unwrap_or(&empty)
        .iter()
        .filter_map(|file| {
            let path = file.get("filename").and_then(Value::as_str)?;
            let patch = file.get("patch").and_then(Value::as_str).unwrap_or("");
            Some(CommitFileRecord {
                data_source: ctx.data_source.clone(),
                project_key: project_key.to_string(),
                repo_slug: repo_slug.to_string(),
                commit_hash: commit_hash.to_string(),
                file_path: path.to_string(),
                diff_hash: record::diff_hash(patch),
                extension: record::file_extension(path),
                lines_added: file.get("additions").and_then(Value::as_i64).unwrap_or(0),
                lines_removed: file.get("deletions").and_then(Value::as_i64).unwrap_or(0),
                is_third_party: None,
                scancode_metadata: None,
                version,
            })
        })
        .collect()
}

fn map_pull_request(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    detail: &Value,
) -> EtlResult<PullRequestRecord> {
    let pr_id = detail
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| EtlError::Mapping("pull request without id".into()))?;
    let pr_number = detail
        .get("number")
        .and_then(Value::as_i64)
        .ok_or_else(|| EtlError::Mapping("pull request without number".into()))?;
    let created_on = time::parse_iso8601(
        detail
            .get("created_at")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::Mapping("pull request without created_at".into()))?,
    )?;
    let updated_on = detail
        .get("updated_at")
        .and_then(Value::as_str)
        .map(time::parse_iso8601)
        .transpose()?
        .unwrap_or(created_on);
    let closed_on = detail
        .get("closed_at")
        .and_then(Value::as_str)
        .map(time::parse_iso8601)
        .transpose()?;
    let merged = detail
        .get("merged_at")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    let state = record::PrState::from_github(
        merged,
        detail.get("state").and_then(Value::as_str).unwrap_or("open"),
    );

    Ok(PullRequestRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        pr_id,
        pr_number,
        title: str_or_empty(detail, "title"),
        description: str_or_empty(detail, "body"),
        state,
        author_name: detail
            .pointer("/user/login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        author_email: String::new(),
        created_on,
        updated_on,
        closed_on,
        merge_commit_hash: opt_str(detail, "merge_commit_sha"),
        source_branch: detail
            .pointer("/head/ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        destination_branch: detail
            .pointer("/base/ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        commit_count: detail.get("commits").and_then(Value::as_i64).unwrap_or(0),
        comment_count: detail.get("comments").and_then(Value::as_i64).unwrap_or(0)
            + detail
                .get("review_comments")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        task_count: 0,
        files_changed: detail
            .get("changed_files")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        lines_added: detail.get("additions").and_then(Value::as_i64).unwrap_or(0),
        lines_removed: detail.get("deletions").and_then(Value::as_i64).unwrap_or(0),
        duration_seconds: record::pr_duration_seconds(created_on, closed_on),
        version: ctx.clock.now_ms(),
    })
}

fn map_reviewer(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    pr_id: i64,
    review: &Value,
    version: i64,
) -> Option<ReviewerRecord> {
    let login = review.pointer("/user/login").and_then(Value::as_str)?;
    let status = review
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("COMMENTED")
        .to_string();
    let reviewed_at = review
        .get("submitted_at")
        .and_then(Value::as_str)
        .and_then(|ts| time::parse_iso8601(ts).ok());
    Some(ReviewerRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        pr_id,
        reviewer_uuid: login.to_string(),
        name: login.to_string(),
        email: String::new(),
        approved: record::approved_flag(&status),
        status,
        role: "REVIEWER".to_string(),
        reviewed_at,
        version,
    })
}

fn map_comment(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    pr_id: i64,
    comment: &Value,
    version: i64,
) -> Option<PrCommentRecord> {
    let comment_id = comment.get("id").and_then(Value::as_i64)?;
    let created_at = comment
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|ts| time::parse_iso8601(ts).ok())?;
    Some(PrCommentRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        pr_id,
        comment_id,
        content: str_or_empty(comment, "body"),
        author_name: comment
            .pointer("/user/login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        author_email: String::new(),
        created_at,
        updated_at: comment
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|ts| time::parse_iso8601(ts).ok()),
        state: None,
        severity: None,
        thread_resolved: None,
        // Present only on review (inline) comments.
        file_path: opt_str(comment, "path"),
        line_number: comment.get("line").and_then(Value::as_i64),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::ManualClock;
    use crate::model::source::DataSource;
    use crate::net::{RateLimitState, RateLimiter, UpstreamClient};
    use crate::source::CollectGates;
    use serde_json::json;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn ctx() -> Ctx {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(RateLimitState::new()),
            clock.clone(),
            3,
        ));
        Ctx {
            client: UpstreamClient::new(
                "https://api.github.com",
                "token",
                Some("application/vnd.github.v3+json"),
                std::time::Duration::from_secs(30),
                limiter,
            )
            .unwrap(),
            clock,
            data_source: DataSource::GitHub,
            gates: CollectGates::default(),
            owner: "acme".into(),
            graphql_endpoint: "https://api.github.com/graphql".into(),
            mapping_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn commit_detail_maps_stats_and_file_rows() {
        let ctx = ctx();
        let detail = json!({
            "sha": "deadbeef",
            "commit": {
                "message": "CORE-5 fix parser",
                "author": { "name": "Ann", "email": "ann@example.com", "date": "2025-03-01T10:00:00Z" },
                "committer": { "name": "Ann", "email": "ann@example.com", "date": "2025-03-01T10:05:00Z" }
            },
            "parents": [{ "sha": "a1" }],
            "stats": { "additions": 12, "deletions": 4 },
            "files": [
                { "filename": "src/parse.rs", "additions": 10, "deletions": 4, "patch": "@@ -1 +1 @@" },
                { "filename": "README.md", "additions": 2, "deletions": 0 }
            ]
        });
        let bundle = map_commit_detail(&ctx, "acme", "cli", "main", &detail).unwrap();
        assert_eq!(bundle.commit.is_merge_commit, 0);
        assert_eq!(bundle.commit.files_changed, 2);
        assert_eq!(bundle.commit.lines_added, 12);
        // Committer date wins over author date.
        assert_eq!(
            bundle.commit.date,
            time::parse_iso8601("2025-03-01T10:05:00Z").unwrap()
        );
        assert_eq!(bundle.files.len(), 2);
        assert_eq!(bundle.files[0].extension, "rs");
        assert_eq!(bundle.files[1].lines_added, 2);
        assert_eq!(bundle.tickets.len(), 1);
        assert_eq!(bundle.tickets[0].external_ticket_id, "CORE-5");
    }

    #[test]
    fn rest_pull_request_distinguishes_id_and_number() {
        let ctx = ctx();
        let detail = json!({
            "id": 3018797339i64,
            "number": 4,
            "title": "PLTFRM-84867 feat: cli",
            "body": null,
            "state": "closed",
            "merged_at": "2025-11-22T10:07:07Z",
            "merge_commit_sha": "abc123",
            "created_at": "2025-11-17T19:45:14Z",
            "updated_at": "2025-11-22T10:07:07Z",
            "closed_at": "2025-11-22T10:07:07Z",
            "user": { "login": "octocat" },
            "head": { "ref": "feat/cli" },
            "base": { "ref": "main" },
            "commits": 2,
            "comments": 1,
            "review_comments": 2,
            "changed_files": 5,
            "additions": 120,
            "deletions": 8
        });
        let pr = map_pull_request(&ctx, "acme", "cli", &detail).unwrap();
        assert_eq!(pr.pr_id, 3_018_797_339);
        assert_eq!(pr.pr_number, 4);
        assert_eq!(pr.state.as_str(), "MERGED");
        assert_eq!(pr.duration_seconds, Some(397_313));
        assert_eq!(pr.comment_count, 3);
        assert_eq!(pr.files_changed, 5);
    }

    #[test]
    fn open_pr_maps_open_state_without_duration() {
        let ctx = ctx();
        let detail = json!({
            "id": 10,
            "number": 7,
            "state": "open",
            "merged_at": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z",
            "closed_at": null,
            "user": { "login": "dev" },
            "head": { "ref": "x" },
            "base": { "ref": "main" }
        });
        let pr = map_pull_request(&ctx, "acme", "cli", &detail).unwrap();
        assert_eq!(pr.state.as_str(), "OPEN");
        assert_eq!(pr.duration_seconds, None);
        assert_eq!(pr.closed_on, None);
    }

    #[test]
    fn inline_comment_keeps_path_and_line() {
        let ctx = ctx();
        let comment = json!({
            "id": 55,
            "body": "consider a match",
            "created_at": "2025-02-02T08:00:00Z",
            "user": { "login": "rev" },
            "path": "src/main.rs",
            "line": 33
        });
        let mapped = map_comment(&ctx, "acme", "cli", 10, &comment, 1).unwrap();
        assert_eq!(mapped.file_path.as_deref(), Some("src/main.rs"));
        assert_eq!(mapped.line_number, Some(33));
    }
}
