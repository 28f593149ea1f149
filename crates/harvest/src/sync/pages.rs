//! Lazy, restartable sequence of record pages for one table

use std::sync::Arc;

use crate::airtable::api::RemoteRecord;
use crate::airtable::{AirtableApi, ApiError};

use super::retry::{RetryPolicy, with_retry};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

/// Pages of records for one table, fetched on demand
///
/// The consumer drives the loop by calling [`RecordPages::next_page`]
/// until it yields `None`. A failed fetch leaves the cursor where it was,
/// so the same page is requested again on the next call.
pub struct RecordPages {
    api: Arc<dyn AirtableApi>,
    base_id: String,
    table_id: String,
    retry: RetryPolicy,
    cursor: Cursor,
    pages_fetched: usize,
}

impl RecordPages {
    pub fn new(
        api: Arc<dyn AirtableApi>,
        base_id: impl Into<String>,
        table_id: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            api,
            base_id: base_id.into(),
            table_id: table_id.into(),
            retry,
            cursor: Cursor::Start,
            pages_fetched: 0,
        }
    }

    /// Fetch the next page, or `None` once the table is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<RemoteRecord>>, ApiError> {
        let offset = match &self.cursor {
            Cursor::Start => None,
            Cursor::Next(offset) => Some(offset.clone()),
            Cursor::Exhausted => return Ok(None),
        };

        let label = format!(
            "records {}/{} page {}",
            self.base_id,
            self.table_id,
            self.pages_fetched + 1
        );
        let page = with_retry(&self.retry, &label, || {
            self.api
                .list_records(&self.base_id, &self.table_id, offset.as_deref())
        })
        .await?;

        self.cursor = match page.offset {
            Some(next) => Cursor::Next(next),
            None => Cursor::Exhausted,
        };
        self.pages_fetched += 1;

        Ok(Some(page.records))
    }

    /// Start over from the first page
    pub fn restart(&mut self) {
        self.cursor = Cursor::Start;
        self.pages_fetched = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == Cursor::Exhausted
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}
