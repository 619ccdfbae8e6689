use crate::error::{EtlError, EtlResult};
use chrono::{DateTime, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use url::Url;

use crate::model::source::DataSource;

/// Which upstream dialect an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    BitbucketServer,
    Github,
    Gitlab,
    CustomGit,
}

impl SourceKind {
    /// The canonical discriminator written on every row for this upstream.
    pub fn default_data_source(self) -> DataSource {
        match self {
            SourceKind::BitbucketServer => DataSource::BitbucketServer,
            SourceKind::Github => DataSource::GitHub,
            SourceKind::Gitlab => DataSource::GitLab,
            SourceKind::CustomGit => DataSource::CustomEtl,
        }
    }
}

/// Which branches to walk when collecting commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchMode {
    Default,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub upstream: UpstreamConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub collect: CollectOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub kind: SourceKind,
    pub url: String,
    pub token: String,
    /// GitHub organization (the single virtual project). Required for GitHub.
    pub owner: Option<String>,
    #[serde(default = "default_true")]
    pub use_graphql: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectOptions {
    /// Discriminator override; values outside the canonical set are written
    /// through opaquely.
    pub data_source: Option<String>,
    /// Lower bound override for the collection window (otherwise watermarks).
    pub since: Option<DateTime<Utc>>,
    /// Upper bound override for the collection window.
    pub until: Option<DateTime<Utc>>,
    /// Restrict collection to `PROJECT/slug` entries. Empty means all.
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default = "default_true")]
    pub commits: bool,
    #[serde(default = "default_true")]
    pub pull_requests: bool,
    #[serde(default = "default_true")]
    pub reviews: bool,
    #[serde(default = "default_true")]
    pub comments: bool,
    #[serde(default = "default_branch_mode")]
    pub branches: BranchMode,
    /// Ignore watermarks and re-collect from the beginning of history.
    #[serde(default)]
    pub force_refetch: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            data_source: None,
            since: None,
            until: None,
            repositories: Vec::new(),
            commits: true,
            pull_requests: true,
            reviews: true,
            comments: true,
            branches: default_branch_mode(),
            force_refetch: false,
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database() -> String {
    "insight".to_string()
}

fn default_branch_mode() -> BranchMode {
    BranchMode::Default
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_workers() -> usize {
    5
}

/// Load configuration from an optional file plus `INSIGHT__*` environment
/// variables, then validate it. Invalid configuration is fatal before any
/// run record is written.
pub fn load_config(path: Option<&Path>) -> EtlResult<EtlConfig> {
    let mut builder = Config::builder()
        .add_source(File::with_name("insight").required(false))
        .add_source(Environment::with_prefix("INSIGHT").separator("__"));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        .build()
        .map_err(|err| EtlError::Config(err.to_string()))?;

    let parsed: EtlConfig = config
        .try_deserialize()
        .map_err(|err| EtlError::Config(err.to_string()))?;

    parsed.validate()?;
    Ok(parsed)
}

impl EtlConfig {
    pub fn validate(&self) -> EtlResult<()> {
        Url::parse(&self.upstream.url)
            .map_err(|err| EtlError::Config(format!("upstream.url: {err}")))?;
        Url::parse(&self.sink.url).map_err(|err| EtlError::Config(format!("sink.url: {err}")))?;

        if self.upstream.token.trim().is_empty() {
            return Err(EtlError::Config("upstream.token is required".into()));
        }
        if self.upstream.kind == SourceKind::Github
            && self.upstream.owner.as_deref().unwrap_or("").is_empty()
        {
            return Err(EtlError::Config(
                "upstream.owner is required for GitHub".into(),
            ));
        }
        if self.collect.batch_size == 0 {
            return Err(EtlError::Config("collect.batch_size must be > 0".into()));
        }
        if self.collect.max_workers == 0 {
            return Err(EtlError::Config("collect.max_workers must be > 0".into()));
        }
        if let (Some(since), Some(until)) = (self.collect.since, self.collect.until) {
            if until < since {
                return Err(EtlError::Config(
                    "collect.until must not precede collect.since".into(),
                ));
            }
        }
        Ok(())
    }

    /// The discriminator to write on every row: explicit override first,
    /// otherwise derived from the upstream kind.
    pub fn data_source(&self) -> DataSource {
        match &self.collect.data_source {
            Some(value) => DataSource::from_str_lossy(value),
            None => self.upstream.kind.default_data_source(),
        }
    }

    /// Settings snapshot persisted on the run record. Credentials are
    /// redacted before serialization.
    pub fn settings_snapshot(&self) -> serde_json::Value {
        json!({
            "upstream": {
                "kind": self.upstream.kind,
                "url": self.upstream.url,
                "owner": self.upstream.owner,
                "use_graphql": self.upstream.use_graphql,
                "max_retries": self.upstream.max_retries,
                "timeout_secs": self.upstream.timeout_secs,
            },
            "sink": {
                "url": self.sink.url,
                "database": self.sink.database,
            },
            "collect": self.collect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> EtlConfig {
        EtlConfig {
            upstream: UpstreamConfig {
                kind: SourceKind::BitbucketServer,
                url: "https://git.example.com".into(),
                token: "secret".into(),
                owner: None,
                use_graphql: true,
                max_retries: 3,
                timeout_secs: 30,
            },
            sink: SinkConfig {
                url: "http://localhost:8123".into(),
                user: None,
                password: None,
                database: "insight".into(),
            },
            collect: CollectOptions::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_token_is_fatal() {
        let mut cfg = base_config();
        cfg.upstream.token = "  ".into();
        assert!(matches!(cfg.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn github_requires_owner() {
        let mut cfg = base_config();
        cfg.upstream.kind = SourceKind::Github;
        cfg.upstream.owner = None;
        assert!(matches!(cfg.validate(), Err(EtlError::Config(_))));

        cfg.upstream.owner = Some("acme".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invalid_upstream_url_is_fatal() {
        let mut cfg = base_config();
        cfg.upstream.url = "not a url".into();
        assert!(matches!(cfg.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn snapshot_never_leaks_credentials() {
        let snapshot = base_config().settings_snapshot().to_string();
        assert!(!snapshot.contains("secret"));
    }

    #[test]
    fn data_source_override_passes_through() {
        let mut cfg = base_config();
        assert_eq!(cfg.data_source().as_str(), "insight_bitbucket_server");
        cfg.collect.data_source = Some("dev_metrics".into());
        assert_eq!(cfg.data_source().as_str(), "dev_metrics");
    }
}
