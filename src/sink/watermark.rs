use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EtlResult;
use crate::model::source::DataSource;

// ---------------------------------------------------------------------------
// Watermarks: the single read path the engine has into the store
// ---------------------------------------------------------------------------

/// High-watermarks for one `(project_key, repo_slug, data_source)`. `None`
/// means no prior rows: collect everything. Used only for early stopping,
/// never for identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    /// `max(date)` over the commit table.
    pub max_commit_date: Option<DateTime<Utc>>,
    /// `max(updated_on)` over the pull-request table.
    pub max_pr_updated: Option<DateTime<Utc>>,
}

/// Read-only watermark lookup, implemented by the analytical store.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn watermarks(
        &self,
        project_key: &str,
        repo_slug: &str,
        data_source: &DataSource,
    ) -> EtlResult<Watermarks>;
}
