use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};
use crate::jira::extract_tickets;
use crate::model::clock::Clock;
use crate::model::record::{
    self, BranchRecord, CommitFileRecord, CommitRecord, PrCommentRecord, PrCommitRecord,
    PullRequestRecord, RepositoryRecord, ReviewerRecord, TicketRecord,
};
use crate::model::source::{DataSource, Project};
use crate::model::time;
use crate::net::page::{parse_offset_page, Page, PageCursor, PageFetcher, Paged};
use crate::net::{UpstreamClient, DEFAULT_PAGE_SIZE};
use crate::source::{
    AdapterCapabilities, CollectGates, CommitBundle, PullRequestBundle, SourceAdapter,
};

const API: &str = "rest/api/1.0";

// ---------------------------------------------------------------------------
// BitbucketAdapter: Bitbucket Server REST v1.0
// ---------------------------------------------------------------------------

/// Adapter for Bitbucket Server. Everything is REST with offset/limit
/// pagination; file stats require a per-commit diff call, and PR children
/// come from per-PR activities/commits/changes calls.
pub struct BitbucketAdapter {
    ctx: Ctx,
}

/// Shared state cloned into page fetchers.
#[derive(Clone)]
struct Ctx {
    client: UpstreamClient,
    clock: Arc<dyn Clock>,
    data_source: DataSource,
    gates: CollectGates,
    mapping_errors: Arc<AtomicU64>,
}

impl Ctx {
    fn drop_record(&self, entity: &str, err: &EtlError) {
        self.mapping_errors.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(entity, error = %err, "dropping unmappable record");
    }
}

impl BitbucketAdapter {
    pub fn new(
        client: UpstreamClient,
        clock: Arc<dyn Clock>,
        data_source: DataSource,
        gates: CollectGates,
    ) -> Self {
        Self {
            ctx: Ctx {
                client,
                clock,
                data_source,
                gates,
                mapping_errors: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// Drain an offset-paginated listing endpoint completely.
    async fn get_all(&self, path: &str, extra: &[(&str, String)]) -> EtlResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut start: Option<u64> = Some(0);
        while let Some(offset) = start {
            let mut query: Vec<(&str, String)> = vec![
                ("limit", DEFAULT_PAGE_SIZE.to_string()),
                ("start", offset.to_string()),
            ];
            query.extend(extra.iter().cloned());
            let body = self.ctx.client.get_json(path, &query).await?;
            let page = parse_offset_page(&body)?;
            items.extend(page.items);
            start = match page.next {
                Some(PageCursor::Offset(next)) => Some(next),
                _ => None,
            };
        }
        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for BitbucketAdapter {
    fn data_source(&self) -> DataSource {
        self.ctx.data_source.clone()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            bulk: false,
            inline_commit_files: false,
        }
    }

    fn api_calls(&self) -> u64 {
        self.ctx.client.limiter().calls()
    }

    fn take_mapping_errors(&self) -> u64 {
        self.ctx.mapping_errors.swap(0, Ordering::SeqCst)
    }

    async fn list_projects(&self) -> EtlResult<Vec<Project>> {
        let values = self.get_all(&format!("{API}/projects"), &[]).await?;
        let mut projects = Vec::with_capacity(values.len());
        for value in &values {
            let Some(key) = value.get("key").and_then(Value::as_str) else {
                self.ctx.drop_record(
                    "project",
                    &EtlError::Mapping("project without key".into()),
                );
                continue;
            };
            let mut project = Project::new(key);
            if let Some(name) = value.get("name").and_then(Value::as_str) {
                project = project.with_name(name);
            }
            projects.push(project);
        }
        Ok(projects)
    }

    async fn list_repositories(&self, project: &Project) -> EtlResult<Vec<RepositoryRecord>> {
        let path = format!("{API}/projects/{}/repos", project.key);
        let values = self.get_all(&path, &[]).await?;
        let mut repos = Vec::with_capacity(values.len());
        for value in &values {
            match map_repository(&self.ctx, &project.key, value) {
                Ok(repo) => repos.push(repo),
                Err(err) => self.ctx.drop_record("repository", &err),
            }
        }
        Ok(repos)
    }

    async fn list_branches(
        &self,
        project_key: &str,
        repo_slug: &str,
    ) -> EtlResult<Vec<BranchRecord>> {
        let path = format!("{API}/projects/{project_key}/repos/{repo_slug}/branches");
        let values = self.get_all(&path, &[]).await?;
        let mut branches = Vec::with_capacity(values.len());
        for value in &values {
            match map_branch(&self.ctx, project_key, repo_slug, value) {
                Ok(branch) => branches.push(branch),
                Err(err) => self.ctx.drop_record("branch", &err),
            }
        }
        Ok(branches)
    }

    async fn stream_commits(
        &self,
        project_key: &str,
        repo_slug: &str,
        branch: &str,
        _since: Option<DateTime<Utc>>,
    ) -> EtlResult<Paged<CommitBundle>> {
        // The commits endpoint has no `since` parameter; the caller
        // early-stops against the watermark instead.
        Ok(Paged::new(Box::new(CommitFetcher {
            ctx: self.ctx.clone(),
            project_key: project_key.to_string(),
            repo_slug: repo_slug.to_string(),
            branch: branch.to_string(),
        })))
    }

    async fn stream_commit_files(
        &self,
        project_key: &str,
        repo_slug: &str,
        commit_hash: &str,
    ) -> EtlResult<Vec<CommitFileRecord>> {
        let path =
            format!("{API}/projects/{project_key}/repos/{repo_slug}/commits/{commit_hash}/diff");
        let body = self.ctx.client.get_json(&path, &[]).await?;
        let version = self.ctx.clock.now_ms();
        let empty = Vec::new();
        let diffs = body.get("diffs").and_then(Value::as_array).unwrap_or(&empty);
        let mut files = Vec::with_capacity(diffs.len());
        for diff in diffs {
            match map_commit_file(
                &self.ctx,
                project_key,
                repo_slug,
                commit_hash,
                diff,
                version,
            ) {
                Ok(file) => files.push(file),
                Err(err) => self.ctx.drop_record("commit_file", &err),
            }
        }
        Ok(files)
    }

    async fn stream_pull_requests(
        &self,
        project_key: &str,
        repo_slug: &str,
        _since: Option<DateTime<Utc>>,
    ) -> EtlResult<Paged<PullRequestBundle>> {
        Ok(Paged::new(Box::new(PullRequestFetcher {
            ctx: self.ctx.clone(),
            project_key: project_key.to_string(),
            repo_slug: repo_slug.to_string(),
        })))
    }
}

// ---------------------------------------------------------------------------
// Page fetchers
// ---------------------------------------------------------------------------

struct CommitFetcher {
    ctx: Ctx,
    project_key: String,
    repo_slug: String,
    branch: String,
}

#[async_trait]
impl PageFetcher<CommitBundle> for CommitFetcher {
    async fn fetch(&mut self, cursor: &PageCursor) -> EtlResult<Page<CommitBundle>> {
        let start = match cursor {
            PageCursor::Offset(offset) => *offset,
            _ => 0,
        };
        let path = format!(
            "{API}/projects/{}/repos/{}/commits",
            self.project_key, self.repo_slug
        );
        let query = [
            ("until", self.branch.clone()),
            ("limit", DEFAULT_PAGE_SIZE.to_string()),
            ("start", start.to_string()),
        ];
        let body = self.ctx.client.get_json(&path, &query).await?;
        let raw = parse_offset_page(&body)?;

        let mut items = Vec::with_capacity(raw.items.len());
        for value in &raw.items {
            match map_commit(
                &self.ctx,
                &self.project_key,
                &self.repo_slug,
                &self.branch,
                value,
            ) {
                Ok(bundle) => items.push(bundle),
                Err(err) => self.ctx.drop_record("commit", &err),
            }
        }
        Ok(Page {
            items,
            next: raw.next,
        })
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
        let start = match cursor {
            PageCursor::Offset(offset) => *offset,
            _ => 0,
        };
        let path = format!(
            "{API}/projects/{}/repos/{}/pull-requests",
            self.project_key, self.repo_slug
        );
        let query = [
            ("state", "ALL".to_string()),
            ("order", "NEWEST".to_string()),
            ("limit", DEFAULT_PAGE_SIZE.to_string()),
            ("start", start.to_string()),
        ];
        let body = self.ctx.client.get_json(&path, &query).await?;
        let raw = parse_offset_page(&body)?;

        let mut items = Vec::with_capacity(raw.items.len());
        for value in &raw.items {
            match self.assemble(value).await {
                Ok(bundle) => items.push(bundle),
                Err(err) if matches!(err, EtlError::Mapping(_)) => {
                    self.ctx.drop_record("pull_request", &err)
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Page {
            items,
            next: raw.next,
        })
    }
}

impl PullRequestFetcher {
    /// Map one PR and fetch its children: commits (link rows and count),
    /// changes (file count), activities (comments).
    async fn assemble(&self, value: &Value) -> EtlResult<PullRequestBundle> {
        let mut pr = map_pull_request(&self.ctx, &self.project_key, &self.repo_slug, value)?;
        let pr_id = pr.pr_id;
        let base = format!(
            "{API}/projects/{}/repos/{}/pull-requests/{pr_id}",
            self.project_key, self.repo_slug
        );

        let reviewers = if self.ctx.gates.reviews {
            map_reviewers(&self.ctx, &self.project_key, &self.repo_slug, pr_id, value)
        } else {
            Vec::new()
        };

        let commit_values = self
            .fetch_all_offset(&format!("{base}/commits"))
            .await?;
        let version = self.ctx.clock.now_ms();
        let mut commits = Vec::with_capacity(commit_values.len());
        for (order, commit) in commit_values.iter().enumerate() {
            let Some(hash) = commit.get("id").and_then(Value::as_str) else {
                self.ctx.drop_record(
                    "pr_commit",
                    &EtlError::Mapping("PR commit without id".into()),
                );
                continue;
            };
            commits.push(PrCommitRecord {
                data_source: self.ctx.data_source.clone(),
                project_key: self.project_key.clone(),
                repo_slug: self.repo_slug.clone(),
                pr_id,
                commit_hash: hash.to_string(),
                commit_order: order as i64,
                version,
            });
        }
        pr.commit_count = commits.len() as i64;

        let changes = self.fetch_all_offset(&format!("{base}/changes")).await?;
        pr.files_changed = changes.len() as i64;

        let comments = if self.ctx.gates.comments {
            let activities = self.fetch_all_offset(&format!("{base}/activities")).await?;
            map_comments(
                &self.ctx,
                &self.project_key,
                &self.repo_slug,
                pr_id,
                &activities,
            )
        } else {
            Vec::new()
        };
        if pr.comment_count == 0 {
            pr.comment_count = comments.len() as i64;
        }

        let tickets = pr_tickets(&self.ctx, &self.project_key, &self.repo_slug, &pr, value);

        Ok(PullRequestBundle {
            pull_request: pr,
            reviewers,
            comments,
            commits,
            tickets,
        })
    }

    async fn fetch_all_offset(&self, path: &str) -> EtlResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut start: Option<u64> = Some(0);
        while let Some(offset) = start {
            let query = [
                ("limit", DEFAULT_PAGE_SIZE.to_string()),
                ("start", offset.to_string()),
            ];
            let body = self.ctx.client.get_json(path, &query).await?;
            let page = parse_offset_page(&body)?;
            items.extend(page.items);
            start = match page.next {
                Some(PageCursor::Offset(next)) => Some(next),
                _ => None,
            };
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Field mapping (pure; `_version` stamped from the shared clock)
// ---------------------------------------------------------------------------

fn required_str<'a>(value: &'a Value, field: &str) -> EtlResult<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EtlError::Mapping(format!("missing field {field:?}")))
}

fn person_name(value: &Value) -> String {
    value
        .get("displayName")
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn person_email(value: &Value) -> String {
    value
        .get("emailAddress")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn map_repository(ctx: &Ctx, project_key: &str, value: &Value) -> EtlResult<RepositoryRecord> {
    let slug = required_str(value, "slug")?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(slug)
        .to_string();
    let public = value.get("public").and_then(Value::as_bool).unwrap_or(false);
    let now = ctx.clock.now();
    Ok(RepositoryRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: slug.to_string(),
        name,
        uuid: None,
        is_private: u8::from(!public),
        is_empty: 0,
        fork_policy: None,
        size_bytes: None,
        language: None,
        has_issues: None,
        has_wiki: None,
        last_commit_date: None,
        first_seen: now,
        last_updated: now,
        version: ctx.clock.now_ms(),
    })
}

fn map_branch(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    value: &Value,
) -> EtlResult<BranchRecord> {
    let name = required_str(value, "displayId")?;
    Ok(BranchRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        branch_name: name.to_string(),
        is_default: u8::from(
            value
                .get("isDefault")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        last_commit_hash: value
            .get("latestCommit")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_commit_date: None,
        last_checked_at: ctx.clock.now(),
        version: ctx.clock.now_ms(),
    })
}

fn map_commit(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    branch: &str,
    value: &Value,
) -> EtlResult<CommitBundle> {
    let hash = required_str(value, "id")?;
    let ts = value
        .get("authorTimestamp")
        .ok_or_else(|| EtlError::Mapping("commit without authorTimestamp".into()))?;
    let date = time::parse_mixed(ts)?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let parents = value
        .get("parents")
        .cloned()
        .unwrap_or_else(|| Value::Array(vec![]));
    let parent_count = parents.as_array().map(Vec::len).unwrap_or(0);
    let author = value.get("author").unwrap_or(&Value::Null);
    let committer = value.get("committer").unwrap_or(author);
    let version = ctx.clock.now_ms();

    let commit = CommitRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        commit_hash: hash.to_string(),
        branch: branch.to_string(),
        author_name: person_name(author),
        author_email: person_email(author),
        committer_name: person_name(committer),
        committer_email: person_email(committer),
        message: message.clone(),
        date,
        parents,
        files_changed: 0,
        lines_added: 0,
        lines_removed: 0,
        is_merge_commit: record::merge_flag(parent_count),
        language_breakdown: None,
        version,
    };

    let tickets = extract_tickets([message.as_str()])
        .into_iter()
        .map(|ticket| {
            TicketRecord::for_commit(
                ctx.data_source.clone(),
                project_key,
                repo_slug,
                ticket,
                hash,
                version,
            )
        })
        .collect();

    Ok(CommitBundle {
        commit,
        files: Vec::new(),
        tickets,
    })
}

fn map_commit_file(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    commit_hash: &str,
    diff: &Value,
    version: i64,
) -> EtlResult<CommitFileRecord> {
    let path = diff
        .get("destination")
        .and_then(|d| d.get("toString"))
        .or_else(|| diff.get("source").and_then(|s| s.get("toString")))
        .and_then(Value::as_str)
        .ok_or_else(|| EtlError::Mapping("diff without a file path".into()))?;

    let mut lines_added = 0i64;
    let mut lines_removed = 0i64;
    let empty = Vec::new();
    for hunk in diff.get("hunks").and_then(Value::as_array).unwrap_or(&empty) {
        for segment in hunk
            .get("segments")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let count = segment
                .get("lines")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0) as i64;
            match segment.get("type").and_then(Value::as_str) {
                Some("ADDED") => lines_added += count,
                Some("REMOVED") => lines_removed += count,
                _ => {}
            }
        }
    }

    let hunks = diff.get("hunks").cloned().unwrap_or(Value::Null);
    Ok(CommitFileRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        commit_hash: commit_hash.to_string(),
        file_path: path.to_string(),
        diff_hash: record::diff_hash(&hunks.to_string()),
        extension: record::file_extension(path),
        lines_added,
        lines_removed,
        is_third_party: None,
        scancode_metadata: None,
        version,
    })
}

fn map_pull_request(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    value: &Value,
) -> EtlResult<PullRequestRecord> {
    let pr_id = value
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| EtlError::Mapping("pull request without id".into()))?;
    let created_on = time::parse_mixed(
        value
            .get("createdDate")
            .ok_or_else(|| EtlError::Mapping("pull request without createdDate".into()))?,
    )?;
    let updated_on = value
        .get("updatedDate")
        .map(time::parse_mixed)
        .transpose()?
        .unwrap_or(created_on);
    let closed_on = value
        .get("closedDate")
        .filter(|v| !v.is_null())
        .map(time::parse_mixed)
        .transpose()?;
    let state = record::PrState::from_bitbucket(
        value.get("state").and_then(Value::as_str).unwrap_or("OPEN"),
    );
    let author = value
        .get("author")
        .and_then(|a| a.get("user"))
        .unwrap_or(&Value::Null);
    let properties = value.get("properties").unwrap_or(&Value::Null);

    Ok(PullRequestRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        pr_id,
        // Bitbucket has a single identifier for both.
        pr_number: pr_id,
        title: value
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        description: value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        state,
        author_name: person_name(author),
        author_email: person_email(author),
        created_on,
        updated_on,
        closed_on,
        merge_commit_hash: properties
            .get("mergeCommit")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        source_branch: value
            .get("fromRef")
            .and_then(|r| r.get("displayId"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        destination_branch: value
            .get("toRef")
            .and_then(|r| r.get("displayId"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        commit_count: 0,
        comment_count: properties
            .get("commentCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        task_count: properties
            .get("openTaskCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        files_changed: 0,
        lines_added: 0,
        lines_removed: 0,
        duration_seconds: record::pr_duration_seconds(created_on, closed_on),
        version: ctx.clock.now_ms(),
    })
}

fn map_reviewers(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    pr_id: i64,
    value: &Value,
) -> Vec<ReviewerRecord> {
    let empty = Vec::new();
    let reviewers = value
        .get("reviewers")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let version = ctx.clock.now_ms();
    reviewers
        .iter()
        .filter_map(|reviewer| {
            let user = reviewer.get("user")?;
            let uuid = user
                .get("slug")
                .or_else(|| user.get("name"))
                .and_then(Value::as_str)?;
            // Stored verbatim; a reviewer row without a status stays empty.
            let status = reviewer
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(ReviewerRecord {
                data_source: ctx.data_source.clone(),
                project_key: project_key.to_string(),
                repo_slug: repo_slug.to_string(),
                pr_id,
                reviewer_uuid: uuid.to_string(),
                name: person_name(user),
                email: person_email(user),
                approved: record::approved_flag(&status),
                status,
                role: "REVIEWER".to_string(),
                // Bitbucket does not expose a review timestamp here.
                reviewed_at: None,
                version,
            })
        })
        .collect()
}

fn map_comments(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    pr_id: i64,
    activities: &[Value],
) -> Vec<PrCommentRecord> {
    let mut comments = Vec::new();
    for activity in activities {
        if activity.get("action").and_then(Value::as_str) != Some("COMMENTED") {
            continue;
        }
        let Some(comment) = activity.get("comment") else {
            continue;
        };
        let Some(comment_id) = comment.get("id").and_then(Value::as_i64) else {
            ctx.drop_record(
                "pr_comment",
                &EtlError::Mapping("comment without id".into()),
            );
            continue;
        };
        let created_at = match comment.get("createdDate").map(time::parse_mixed) {
            Some(Ok(ts)) => ts,
            _ => {
                ctx.drop_record(
                    "pr_comment",
                    &EtlError::Mapping("comment without createdDate".into()),
                );
                continue;
            }
        };
        let author = comment.get("author").unwrap_or(&Value::Null);
        let anchor = activity.get("commentAnchor").unwrap_or(&Value::Null);
        comments.push(PrCommentRecord {
            data_source: ctx.data_source.clone(),
            project_key: project_key.to_string(),
            repo_slug: repo_slug.to_string(),
            pr_id,
            comment_id,
            content: comment
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            author_name: person_name(author),
            author_email: person_email(author),
            created_at,
            updated_at: comment
                .get("updatedDate")
                .filter(|v| !v.is_null())
                .map(time::parse_mixed)
                .and_then(Result::ok),
            state: comment
                .get("state")
                .and_then(Value::as_str)
                .map(str::to_string),
            severity: comment
                .get("severity")
                .and_then(Value::as_str)
                .map(str::to_string),
            thread_resolved: comment
                .get("threadResolved")
                .and_then(Value::as_bool)
                .map(u8::from),
            file_path: anchor
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string),
            line_number: anchor.get("line").and_then(Value::as_i64),
            version: ctx.clock.now_ms(),
        });
    }
    comments
}

/// Union of regex extraction over title/description and the upstream's
/// `properties.jira-key` list, deduplicated by ticket id.
fn pr_tickets(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    pr: &PullRequestRecord,
    value: &Value,
) -> Vec<TicketRecord> {
    let mut keys = extract_tickets([pr.title.as_str(), pr.description.as_str()]);
    if let Some(listed) = value
        .get("properties")
        .and_then(|p| p.get("jira-key"))
        .and_then(Value::as_array)
    {
        for key in listed.iter().filter_map(Value::as_str) {
            keys.insert(key.to_string());
        }
    }
    keys.into_iter()
        .map(|key| {
            TicketRecord::for_pr(
                ctx.data_source.clone(),
                project_key,
                repo_slug,
                key,
                pr.pr_id,
                pr.version,
            )
        })
        .collect()
}
