use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EtlResult;
use crate::model::record::{Record, Table};

pub mod store;
pub mod watermark;

pub use store::AnalyticalStore;
pub use watermark::{WatermarkStore, Watermarks};

// ---------------------------------------------------------------------------
// RowSink trait: the store's bulk-insert surface
// ---------------------------------------------------------------------------

/// Bulk row insertion into one destination table. The store deduplicates by
/// primary key with `_version` at read time; the sink only has to deliver
/// rows at least once.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn insert_rows(&self, table: Table, rows: Vec<Value>) -> EtlResult<()>;
}

// ---------------------------------------------------------------------------
// BatchedSink: per-table batches, flush on threshold or finalize
// ---------------------------------------------------------------------------

/// Accumulates rows per table and flushes when a batch reaches the
/// threshold. `flush_all` walks tables in dependency order so parent rows
/// always land before children within a finalize. Not thread-safe; callers
/// serialize access.
pub struct BatchedSink {
    sink: Arc<dyn RowSink>,
    threshold: usize,
    batches: HashMap<Table, Vec<Value>>,
}

impl BatchedSink {
    pub fn new(sink: Arc<dyn RowSink>, threshold: usize) -> Self {
        Self {
            sink,
            threshold: threshold.max(1),
            batches: HashMap::new(),
        }
    }

    /// Append one record; flushes its table once the batch is full. A
    /// failed flush propagates: the orchestrator decides whether that kills
    /// the run.
    pub async fn push(&mut self, record: Record) -> EtlResult<()> {
        let table = record.table();
        let row = record.into_row()?;
        let batch = self.batches.entry(table).or_default();
        batch.push(row);
        if batch.len() >= self.threshold {
            self.flush(table).await?;
        }
        Ok(())
    }

    /// Flush one table's pending batch, if any.
    pub async fn flush(&mut self, table: Table) -> EtlResult<()> {
        let Some(rows) = self.batches.remove(&table) else {
            return Ok(());
        };
        if rows.is_empty() {
            return Ok(());
        }
        tracing::debug!(table = table.name(), rows = rows.len(), "flushing batch");
        self.sink.insert_rows(table, rows).await
    }

    /// Flush every non-empty table in dependency order.
    pub async fn flush_all(&mut self) -> EtlResult<()> {
        for table in Table::FLUSH_ORDER {
            self.flush(table).await?;
        }
        Ok(())
    }

    /// Rows currently buffered across all tables.
    pub fn pending(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    /// Drop every buffered row without inserting it. Used when a run fails:
    /// persisting partial data would advance the watermarks past records
    /// that were never collected. Returns the number of rows discarded.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending();
        self.batches.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::TicketRecord;
    use crate::model::source::DataSource;
    use std::sync::Mutex;

    /// Records every insert; optionally fails on a given table.
    struct RecordingSink {
        inserts: Mutex<Vec<(Table, usize)>>,
        fail_on: Option<Table>,
    }

    impl RecordingSink {
        fn new(fail_on: Option<Table>) -> Self {
            Self {
                inserts: Mutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl RowSink for RecordingSink {
        async fn insert_rows(&self, table: Table, rows: Vec<Value>) -> EtlResult<()> {
            if self.fail_on == Some(table) {
                return Err(crate::error::EtlError::Sink("insert refused".into()));
            }
            self.inserts.lock().unwrap().push((table, rows.len()));
            Ok(())
        }
    }

    fn ticket(n: i64) -> Record {
        Record::Ticket(TicketRecord::for_pr(
            DataSource::GitHub,
            "ORG",
            "repo",
            format!("CORE-{n}"),
            n,
            n,
        ))
    }

    #[tokio::test]
    async fn threshold_three_splits_seven_rows_into_three_flushes() {
        let recording = Arc::new(RecordingSink::new(None));
        let mut sink = BatchedSink::new(recording.clone(), 3);
        for n in 0..7 {
            sink.push(ticket(n)).await.unwrap();
        }
        sink.flush_all().await.unwrap();

        let inserts = recording.inserts.lock().unwrap();
        let sizes: Vec<usize> = inserts.iter().map(|(_, len)| *len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(sizes.iter().sum::<usize>(), 7);
    }

    #[tokio::test]
    async fn flush_all_walks_dependency_order() {
        let recording = Arc::new(RecordingSink::new(None));
        let mut sink = BatchedSink::new(recording.clone(), 100);

        // Push children before parents; flush order must still be
        // parents-first.
        sink.push(ticket(1)).await.unwrap();
        sink.push(Record::Repository(repo_record())).await.unwrap();
        sink.flush_all().await.unwrap();

        let inserts = recording.inserts.lock().unwrap();
        assert_eq!(inserts[0].0, Table::Repositories);
        assert_eq!(inserts[1].0, Table::Tickets);
    }

    #[tokio::test]
    async fn failed_flush_propagates_and_keeps_nothing_buffered_twice() {
        let recording = Arc::new(RecordingSink::new(Some(Table::Tickets)));
        let mut sink = BatchedSink::new(recording.clone(), 1);
        let err = sink.push(ticket(1)).await.unwrap_err();
        assert!(err.is_fatal_to_run());
    }

    #[tokio::test]
    async fn pending_counts_buffered_rows() {
        let recording = Arc::new(RecordingSink::new(None));
        let mut sink = BatchedSink::new(recording, 10);
        assert_eq!(sink.pending(), 0);
        sink.push(ticket(1)).await.unwrap();
        sink.push(ticket(2)).await.unwrap();
        assert_eq!(sink.pending(), 2);
    }

    #[tokio::test]
    async fn discard_pending_drops_rows_without_inserting() {
        let recording = Arc::new(RecordingSink::new(None));
        let mut sink = BatchedSink::new(recording.clone(), 10);
        sink.push(ticket(1)).await.unwrap();
        sink.push(Record::Repository(repo_record())).await.unwrap();

        assert_eq!(sink.discard_pending(), 2);
        assert_eq!(sink.pending(), 0);
        sink.flush_all().await.unwrap();
        assert!(recording.inserts.lock().unwrap().is_empty());
    }

    fn repo_record() -> crate::model::record::RepositoryRecord {
        use chrono::TimeZone;
        let now = chrono::Utc.timestamp_millis_opt(0).single().unwrap();
        crate::model::record::RepositoryRecord {
            data_source: DataSource::GitHub,
            project_key: "ORG".into(),
            repo_slug: "repo".into(),
            name: "repo".into(),
            uuid: None,
            is_private: 1,
            is_empty: 0,
            fork_policy: None,
            size_bytes: None,
            language: None,
            has_issues: None,
            has_wiki: None,
            last_commit_date: None,
            first_seen: now,
            last_updated: now,
            version: 0,
        }
    }
}
