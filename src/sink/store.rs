use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::SinkConfig;
use crate::error::{EtlError, EtlResult};
use crate::model::record::Table;
use crate::model::source::DataSource;
use crate::model::time;
use crate::sink::watermark::{WatermarkStore, Watermarks};
use crate::sink::RowSink;

// ---------------------------------------------------------------------------
// AnalyticalStore: HTTP client for the column store
// ---------------------------------------------------------------------------

/// Client for the merge-on-read analytical store. Writes are JSONEachRow
/// bulk inserts; the only read is the per-repository watermark aggregate.
/// Every failure maps to the sink error kind: a lost insert is fatal to the
/// run no matter what the transport said.
pub struct AnalyticalStore {
    http: reqwest::Client,
    base_url: Url,
    database: String,
}

impl AnalyticalStore {
    pub fn new(config: &SinkConfig, timeout: Duration) -> EtlResult<Self> {
        let base_url: Url = config.url.parse()?;

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(user) = &config.user {
            headers.insert(
                "X-ClickHouse-User",
                user.parse()
                    .map_err(|_| EtlError::Config("invalid sink user".into()))?,
            );
        }
        if let Some(password) = &config.password {
            let mut value: reqwest::header::HeaderValue = password
                .parse()
                .map_err(|_| EtlError::Config("invalid sink password".into()))?;
            value.set_sensitive(true);
            headers.insert("X-ClickHouse-Key", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            database: config.database.clone(),
        })
    }

    /// POST one statement, with an optional data body (inserts).
    async fn execute(&self, sql: String, body: String) -> EtlResult<String> {
        let resp = self
            .http
            .post(self.base_url.clone())
            .query(&[("query", sql.as_str())])
            .body(body)
            .send()
            .await
            .map_err(|err| EtlError::Sink(err.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| EtlError::Sink(err.to_string()))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(EtlError::Sink(format!("store returned {status}: {text}")))
        }
    }

    async fn max_ms(
        &self,
        table: Table,
        column: &str,
        project_key: &str,
        repo_slug: &str,
        data_source: &DataSource,
    ) -> EtlResult<Option<i64>> {
        let sql = watermark_sql(
            &self.database,
            table,
            column,
            project_key,
            repo_slug,
            data_source,
        );
        let text = self.execute(sql, String::new()).await?;
        let body: Value =
            serde_json::from_str(&text).map_err(|err| EtlError::Sink(err.to_string()))?;
        Ok(parse_max_ms(&body))
    }
}

#[async_trait]
impl RowSink for AnalyticalStore {
    async fn insert_rows(&self, table: Table, rows: Vec<Value>) -> EtlResult<()> {
        let mut body = String::new();
        for row in &rows {
            body.push_str(&row.to_string());
            body.push('\n');
        }
        self.execute(insert_sql(&self.database, table), body)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for AnalyticalStore {
    async fn watermarks(
        &self,
        project_key: &str,
        repo_slug: &str,
        data_source: &DataSource,
    ) -> EtlResult<Watermarks> {
        let max_commit = self
            .max_ms(Table::Commits, "date", project_key, repo_slug, data_source)
            .await?;
        let max_pr = self
            .max_ms(
                Table::PullRequests,
                "updated_on",
                project_key,
                repo_slug,
                data_source,
            )
            .await?;
        Ok(Watermarks {
            max_commit_date: max_commit.map(time::from_epoch_ms).transpose()?,
            max_pr_updated: max_pr.map(time::from_epoch_ms).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Statement building
// ---------------------------------------------------------------------------

fn insert_sql(database: &str, table: Table) -> String {
    format!(
        "INSERT INTO {database}.{table} FORMAT JSONEachRow",
        table = table.name()
    )
}

/// Single-row aggregate over the deduplicated (`FINAL`) view. `max` over an
/// empty selection comes back as epoch zero, which reads as "no watermark".
fn watermark_sql(
    database: &str,
    table: Table,
    column: &str,
    project_key: &str,
    repo_slug: &str,
    data_source: &DataSource,
) -> String {
    format!(
        "SELECT toUnixTimestamp64Milli(max({column})) AS max_ms \
         FROM {database}.{table} FINAL \
         WHERE project_key = '{project}' AND repo_slug = '{repo}' AND data_source = '{source}' \
         FORMAT JSON",
        table = table.name(),
        project = escape(project_key),
        repo = escape(repo_slug),
        source = escape(data_source.as_str()),
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn parse_max_ms(body: &Value) -> Option<i64> {
    let field = body.pointer("/data/0/max_ms")?;
    let ms = match field {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    (ms > 0).then_some(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_statement_targets_the_table() {
        assert_eq!(
            insert_sql("insight", Table::Commits),
            "INSERT INTO insight.insight_commits FORMAT JSONEachRow"
        );
    }

    #[test]
    fn watermark_statement_filters_on_identity() {
        let sql = watermark_sql(
            "insight",
            Table::PullRequests,
            "updated_on",
            "TEST",
            "test-core",
            &DataSource::BitbucketServer,
        );
        assert!(sql.contains("max(updated_on)"));
        assert!(sql.contains("FROM insight.insight_pull_requests FINAL"));
        assert!(sql.contains("project_key = 'TEST'"));
        assert!(sql.contains("data_source = 'insight_bitbucket_server'"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(escape("o'brien"), "o\\'brien");
        assert_eq!(escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn empty_aggregate_reads_as_no_watermark() {
        assert_eq!(parse_max_ms(&json!({ "data": [{ "max_ms": "0" }] })), None);
        assert_eq!(
            parse_max_ms(&json!({ "data": [{ "max_ms": "1500000" }] })),
            Some(1_500_000)
        );
        assert_eq!(
            parse_max_ms(&json!({ "data": [{ "max_ms": 2500000 }] })),
            Some(2_500_000)
        );
        assert_eq!(parse_max_ms(&json!({ "data": [] })), None);
    }
}
