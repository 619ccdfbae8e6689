use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;

use crate::error::{EtlError, EtlResult};

// ---------------------------------------------------------------------------
// Pagination: one lazy stream over two upstream dialects
// ---------------------------------------------------------------------------

/// Default page size for REST/offset listings and commit-history GraphQL.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Page size for PR GraphQL queries, which carry heavy nested payloads.
pub const PR_PAGE_SIZE: u32 = 50;

/// Position of the next page in either dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// First request, no position yet.
    Start,
    /// Offset/limit dialect: the `nextPageStart` value.
    Offset(u64),
    /// Cursor dialect: the `endCursor` value.
    Cursor(String),
}

/// One fetched page plus the position of the next, if any.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

/// A source of pages. Implementations make one upstream request per call.
#[async_trait]
pub trait PageFetcher<T>: Send {
    async fn fetch(&mut self, cursor: &PageCursor) -> EtlResult<Page<T>>;
}

/// A finite, single-pass, non-restartable record stream driven by a
/// [`PageFetcher`]. The next page is requested only when the buffer runs
/// dry, so early-stopping callers never pay for pages they do not read.
pub struct Paged<T> {
    fetcher: Box<dyn PageFetcher<T>>,
    buffer: VecDeque<T>,
    next: Option<PageCursor>,
}

impl<T> Paged<T> {
    pub fn new(fetcher: Box<dyn PageFetcher<T>>) -> Self {
        Self {
            fetcher,
            buffer: VecDeque::new(),
            next: Some(PageCursor::Start),
        }
    }

    /// Pull the next record, fetching pages on demand. `Ok(None)` means the
    /// stream is exhausted.
    pub async fn next(&mut self) -> EtlResult<Option<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            let Some(cursor) = self.next.take() else {
                return Ok(None);
            };
            let page = self.fetcher.fetch(&cursor).await?;
            self.buffer.extend(page.items);
            self.next = page.next;
        }
    }

    /// Early-stop: discard the buffered remainder and never request another
    /// page.
    pub fn stop(&mut self) {
        self.buffer.clear();
        self.next = None;
    }
}

// ---------------------------------------------------------------------------
// Response parsing for the two dialects
// ---------------------------------------------------------------------------

/// Parse a Bitbucket-style offset/limit envelope: `values`, `isLastPage`,
/// `nextPageStart`.
pub fn parse_offset_page(body: &Value) -> EtlResult<Page<Value>> {
    let items = body
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| EtlError::Mapping(format!("page without values: {body}")))?
        .clone();
    let is_last = body
        .get("isLastPage")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let next = if is_last {
        None
    } else {
        body.get("nextPageStart")
            .and_then(Value::as_u64)
            .map(PageCursor::Offset)
    };
    Ok(Page { items, next })
}

/// Parse a GraphQL connection: `nodes` plus `pageInfo{hasNextPage,endCursor}`.
pub fn parse_cursor_page(connection: &Value) -> EtlResult<Page<Value>> {
    let items = connection
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| EtlError::Mapping(format!("connection without nodes: {connection}")))?
        .iter()
        .filter(|node| !node.is_null())
        .cloned()
        .collect();
    let page_info = connection.get("pageInfo").unwrap_or(&Value::Null);
    let has_next = page_info
        .get("hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let next = if has_next {
        page_info
            .get("endCursor")
            .and_then(Value::as_str)
            .map(|cursor| PageCursor::Cursor(cursor.to_string()))
    } else {
        None
    };
    Ok(Page { items, next })
}
