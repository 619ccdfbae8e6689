use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::error::{EtlError, EtlResult};
use crate::model::record::{
    self, CommitRecord, PrCommentRecord, PrCommitRecord, PullRequestRecord, RepositoryRecord,
    ReviewerRecord,
};
use crate::model::source::Project;
use crate::model::time;
use crate::net::page::{parse_cursor_page, Page, PageCursor, PageFetcher, Paged};
use crate::net::{DEFAULT_PAGE_SIZE, PR_PAGE_SIZE};
use crate::source::{CommitBundle, PullRequestBundle};

use super::{commit_tickets, pr_tickets, str_or_empty, Ctx};

// ---------------------------------------------------------------------------
// GraphQL bulk path: commits with stats inline, PRs with nested children
// ---------------------------------------------------------------------------

const REPOSITORIES_QUERY: &str = r#"
query($owner: String!, $pageSize: Int!, $after: String) {
  organization(login: $owner) {
    repositories(first: $pageSize, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        name
        isPrivate
        isEmpty
        diskUsage
        hasIssuesEnabled
        hasWikiEnabled
        pushedAt
        primaryLanguage { name }
      }
    }
  }
}
"#;

const COMMIT_HISTORY_QUERY: &str = r#"
query($owner: String!, $name: String!, $ref: String!, $pageSize: Int!, $after: String, $since: GitTimestamp) {
  repository(owner: $owner, name: $name) {
    ref(qualifiedName: $ref) {
      target {
        ... on Commit {
          history(first: $pageSize, after: $after, since: $since) {
            pageInfo { hasNextPage endCursor }
            nodes {
              oid
              message
              committedDate
              additions
              deletions
              changedFilesIfAvailable
              author { name email }
              committer { name email }
              parents(first: 20) { nodes { oid } }
            }
          }
        }
      }
    }
  }
}
"#;

pub(super) async fn list_repositories(
    ctx: &Ctx,
    project: &Project,
) -> EtlResult<Vec<RepositoryRecord>> {
    let mut repos = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let body = ctx
            .client
            .post_graphql(
                &ctx.graphql_endpoint,
                REPOSITORIES_QUERY,
                json!({
                    "owner": ctx.owner,
                    "pageSize": DEFAULT_PAGE_SIZE,
                    "after": after,
                }),
            )
            .await?;
        let connection = body
            .pointer("/data/organization/repositories")
            .ok_or_else(|| EtlError::Mapping("organization not found in response".into()))?;
        let page = parse_cursor_page(connection)?;
        for node in &page.items {
            match map_repository(ctx, &project.key, node) {
                Ok(repo) => repos.push(repo),
                Err(err) => ctx.drop_record("repository", &err),
            }
        }
        match page.next {
            Some(PageCursor::Cursor(cursor)) => after = Some(cursor),
            _ => break,
        }
    }
    Ok(repos)
}

pub(super) fn commit_stream(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    branch: &str,
    since: Option<DateTime<Utc>>,
) -> Paged<CommitBundle> {
    Paged::new(Box::new(CommitHistoryFetcher {
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
    // UPDATED_AT DESC ordering; the caller early-stops at the watermark.
    Paged::new(Box::new(PullRequestFetcher {
        ctx: ctx.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
    }))
}

struct CommitHistoryFetcher {
    ctx: Ctx,
    project_key: String,
    repo_slug: String,
    branch: String,
    since: Option<DateTime<Utc>>,
}

#[async_trait]
impl PageFetcher<CommitBundle> for CommitHistoryFetcher {
    async fn fetch(&mut self, cursor: &PageCursor) -> EtlResult<Page<CommitBundle>> {
        let after = match cursor {
            PageCursor::Cursor(cursor) => Some(cursor.clone()),
            _ => None,
        };
        let since = self
            .since
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true));
        let body = self
            .ctx
            .client
            .post_graphql(
                &self.ctx.graphql_endpoint,
                COMMIT_HISTORY_QUERY,
                json!({
                    "owner": self.ctx.owner,
                    "name": self.repo_slug,
                    "ref": self.branch,
                    "pageSize": DEFAULT_PAGE_SIZE,
                    "after": after,
                    "since": since,
                }),
            )
            .await?;

        // A missing ref means an empty repository: an empty final page.
        let Some(history) = body.pointer("/data/repository/ref/target/history") else {
            return Ok(Page {
                items: vec![],
                next: None,
            });
        };
        let raw = parse_cursor_page(history)?;
        let mut items = Vec::with_capacity(raw.items.len());
        for node in &raw.items {
            match map_commit(&self.ctx, &self.project_key, &self.repo_slug, &self.branch, node) {
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
        let after = match cursor {
            PageCursor::Cursor(cursor) => Some(cursor.clone()),
            _ => None,
        };
        let body = self
            .ctx
            .client
            .post_graphql(
                &self.ctx.graphql_endpoint,
                &pull_request_query(&self.ctx),
                json!({
                    "owner": self.ctx.owner,
                    "name": self.repo_slug,
                    "pageSize": PR_PAGE_SIZE,
                    "after": after,
                }),
            )
            .await?;

        let connection = body
            .pointer("/data/repository/pullRequests")
            .ok_or_else(|| EtlError::Mapping("repository not found in response".into()))?;
        let raw = parse_cursor_page(connection)?;
        let mut items = Vec::with_capacity(raw.items.len());
        for node in &raw.items {
            match map_pull_request_bundle(&self.ctx, &self.project_key, &self.repo_slug, node) {
                Ok(bundle) => items.push(bundle),
                Err(err) => self.ctx.drop_record("pull_request", &err),
            }
        }
        Ok(Page {
            items,
            next: raw.next,
        })
    }
}

/// The PR query with nested blocks only for the gated payloads.
fn pull_request_query(ctx: &Ctx) -> String {
    let reviews = if ctx.gates.reviews {
        "reviews(first: 50) { nodes { databaseId state submittedAt author { login } } }"
    } else {
        ""
    };
    let comments = if ctx.gates.comments {
        "comments(first: 100) { totalCount nodes { databaseId body createdAt updatedAt author { login } } }"
    } else {
        "comments { totalCount }"
    };
    format!(
        r#"
query($owner: String!, $name: String!, $pageSize: Int!, $after: String) {{
  repository(owner: $owner, name: $name) {{
    pullRequests(first: $pageSize, after: $after, states: [OPEN, CLOSED, MERGED], orderBy: {{ field: UPDATED_AT, direction: DESC }}) {{
      pageInfo {{ hasNextPage endCursor }}
      nodes {{
        databaseId
        number
        title
        body
        state
        merged
        mergeCommit {{ oid }}
        createdAt
        updatedAt
        closedAt
        author {{ login }}
        baseRefName
        headRefName
        additions
        deletions
        changedFiles
        commits(first: 100) {{ totalCount nodes {{ commit {{ oid }} }} }}
        {reviews}
        {comments}
      }}
    }}
  }}
}}
"#
    )
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

fn map_repository(ctx: &Ctx, project_key: &str, node: &Value) -> EtlResult<RepositoryRecord> {
    let name = node
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| EtlError::Mapping("repository without name".into()))?;
    let now = ctx.clock.now();
    let last_commit_date = node
        .get("pushedAt")
        .and_then(Value::as_str)
        .map(time::parse_iso8601)
        .transpose()?;
    Ok(RepositoryRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: name.to_string(),
        name: name.to_string(),
        uuid: None,
        is_private: u8::from(
            node.get("isPrivate")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        ),
        is_empty: u8::from(node.get("isEmpty").and_then(Value::as_bool).unwrap_or(false)),
        fork_policy: None,
        // diskUsage is reported in kilobytes.
        size_bytes: node
            .get("diskUsage")
            .and_then(Value::as_i64)
            .map(|kb| kb * 1024),
        language: node
            .pointer("/primaryLanguage/name")
            .and_then(Value::as_str)
            .map(str::to_string),
        has_issues: node
            .get("hasIssuesEnabled")
            .and_then(Value::as_bool)
            .map(u8::from),
        has_wiki: node
            .get("hasWikiEnabled")
            .and_then(Value::as_bool)
            .map(u8::from),
        last_commit_date,
        first_seen: now,
        last_updated: now,
        version: ctx.clock.now_ms(),
    })
}

fn map_commit(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    branch: &str,
    node: &Value,
) -> EtlResult<CommitBundle> {
    let hash = node
        .get("oid")
        .and_then(Value::as_str)
        .ok_or_else(|| EtlError::Mapping("commit without oid".into()))?;
    let date = time::parse_iso8601(
        node.get("committedDate")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::Mapping("commit without committedDate".into()))?,
    )?;
    let message = str_or_empty(node, "message");

    // Parents flatten to an array of SHA strings.
    let parent_shas: Vec<Value> = node
        .pointer("/parents/nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.get("oid").and_then(Value::as_str))
                .map(|oid| Value::String(oid.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let parent_count = parent_shas.len();

    let author = node.get("author").unwrap_or(&Value::Null);
    let committer = node.get("committer").unwrap_or(author);
    let version = ctx.clock.now_ms();

    let commit = CommitRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        commit_hash: hash.to_string(),
        branch: branch.to_string(),
        author_name: str_or_empty(author, "name"),
        author_email: str_or_empty(author, "email"),
        committer_name: str_or_empty(committer, "name"),
        committer_email: str_or_empty(committer, "email"),
        message: message.clone(),
        date,
        parents: Value::Array(parent_shas),
        files_changed: node
            .get("changedFilesIfAvailable")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        lines_added: node.get("additions").and_then(Value::as_i64).unwrap_or(0),
        lines_removed: node.get("deletions").and_then(Value::as_i64).unwrap_or(0),
        is_merge_commit: record::merge_flag(parent_count),
        language_breakdown: None,
        version,
    };

    let tickets = commit_tickets(ctx, project_key, repo_slug, hash, &message, version);

    Ok(CommitBundle {
        commit,
        // Per-file rows are not part of the commit-history query; line and
        // file counts arrive inline above.
        files: Vec::new(),
        tickets,
    })
}

fn map_pull_request_bundle(
    ctx: &Ctx,
    project_key: &str,
    repo_slug: &str,
    node: &Value,
) -> EtlResult<PullRequestBundle> {
    let pr_id = node
        .get("databaseId")
        .and_then(Value::as_i64)
        .ok_or_else(|| EtlError::Mapping("pull request without databaseId".into()))?;
    let pr_number = node
        .get("number")
        .and_then(Value::as_i64)
        .ok_or_else(|| EtlError::Mapping("pull request without number".into()))?;
    let created_on = time::parse_iso8601(
        node.get("createdAt")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::Mapping("pull request without createdAt".into()))?,
    )?;
    let updated_on = node
        .get("updatedAt")
        .and_then(Value::as_str)
        .map(time::parse_iso8601)
        .transpose()?
        .unwrap_or(created_on);
    let closed_on = node
        .get("closedAt")
        .and_then(Value::as_str)
        .map(time::parse_iso8601)
        .transpose()?;
    let merged = node.get("merged").and_then(Value::as_bool).unwrap_or(false);
    let state = record::PrState::from_github(
        merged,
        node.get("state").and_then(Value::as_str).unwrap_or("OPEN"),
    );
    let title = str_or_empty(node, "title");
    let description = str_or_empty(node, "body");
    let version = ctx.clock.now_ms();

    let pull_request = PullRequestRecord {
        data_source: ctx.data_source.clone(),
        project_key: project_key.to_string(),
        repo_slug: repo_slug.to_string(),
        pr_id,
        pr_number,
        title: title.clone(),
        description: description.clone(),
        state,
        author_name: node
            .pointer("/author/login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        // GitHub never exposes user emails here.
        author_email: String::new(),
        created_on,
        updated_on,
        closed_on,
        merge_commit_hash: node
            .pointer("/mergeCommit/oid")
            .and_then(Value::as_str)
            .map(str::to_string),
        source_branch: str_or_empty(node, "headRefName"),
        destination_branch: str_or_empty(node, "baseRefName"),
        commit_count: node
            .pointer("/commits/totalCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        comment_count: node
            .pointer("/comments/totalCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        task_count: 0,
        files_changed: node.get("changedFiles").and_then(Value::as_i64).unwrap_or(0),
        lines_added: node.get("additions").and_then(Value::as_i64).unwrap_or(0),
        lines_removed: node.get("deletions").and_then(Value::as_i64).unwrap_or(0),
        duration_seconds: record::pr_duration_seconds(created_on, closed_on),
        version,
    };

    let empty = Vec::new();
    let reviewers = node
        .pointer("/reviews/nodes")
        .and_then(Value::as_array)
        .unwrap_or(&empty)
        .iter()
        .filter_map(|review| map_reviewer(ctx, project_key, repo_slug, pr_id, review, version))
        .collect();

    let comments = node
        .pointer("/comments/nodes")
        .and_then(Value::as_array)
        .unwrap_or(&empty)
        .iter()
        .filter_map(|comment| map_comment(ctx, project_key, repo_slug, pr_id, comment, version))
        .collect();

    let commits = node
        .pointer("/commits/nodes")
        .and_then(Value::as_array)
        .unwrap_or(&empty)
        .iter()
        .enumerate()
        .filter_map(|(order, entry)| {
            let oid = entry.pointer("/commit/oid").and_then(Value::as_str)?;
            Some(PrCommitRecord {
                data_source: ctx.data_source.clone(),
                project_key: project_key.to_string(),
                repo_slug: repo_slug.to_string(),
                pr_id,
                commit_hash: oid.to_string(),
                commit_order: order as i64,
                version,
            })
        })
        .collect();

    let tickets = pr_tickets(
        ctx,
        project_key,
        repo_slug,
        pr_id,
        &title,
        &description,
        version,
    );

    Ok(PullRequestBundle {
        pull_request,
        reviewers,
        comments,
        commits,
        tickets,
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
    let login = review.pointer("/author/login").and_then(Value::as_str)?;
    // Verbatim: the review API sometimes serves lowercase states.
    let status = review
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("COMMENTED")
        .to_string();
    let reviewed_at = review
        .get("submittedAt")
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
    let comment_id = comment.get("databaseId").and_then(Value::as_i64)?;
    let created_at = comment
        .get("createdAt")
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
            .pointer("/author/login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        author_email: String::new(),
        created_at,
        updated_at: comment
            .get("updatedAt")
            .and_then(Value::as_str)
            .and_then(|ts| time::parse_iso8601(ts).ok()),
        state: None,
        severity: None,
        thread_resolved: None,
        file_path: None,
        line_number: None,
        version,
    })
}
