//! In-memory row source, for tests and for callers that already hold the rows.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::RowSource;
use crate::error::{Error, Result};
use crate::job::MigrationJob;
use crate::record::RawRow;

/// Serves a fixed, already ordered list of rows.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Vec<RawRow>,
    fetches: AtomicUsize,
    page_sizes: Mutex<Vec<usize>>,
    fail_at_fetch: Option<usize>,
}

impl MemorySource {
    /// Creates a source over `rows`.
    #[must_use]
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Makes the `n`-th `fetch_page` call (zero based) fail with a source error.
    #[must_use]
    pub fn failing_at_fetch(mut self, n: usize) -> Self {
        self.fail_at_fetch = Some(n);
        self
    }

    /// Number of `fetch_page` calls so far.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Length of every page returned so far.
    #[must_use]
    pub fn page_sizes(&self) -> Vec<usize> {
        self.page_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RowSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn count(&self, _job: &MigrationJob) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }

    async fn fetch_page(&self, _job: &MigrationJob, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        let call = self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_at_fetch == Some(call) {
            return Err(Error::SourceQuery(format!("fetch {call} failed")));
        }
        let page: Vec<RawRow> = usize::try_from(offset)
            .ok()
            .and_then(|start| self.rows.get(start..))
            .unwrap_or_default()
            .iter()
            .take(limit)
            .cloned()
            .collect();
        if let Ok(mut sizes) = self.page_sizes.lock() {
            sizes.push(page.len());
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EntityKind, JobArgs, RunMode};
    use serde_json::json;

    #[tokio::test]
    async fn test_pages_past_the_end_are_empty() {
        let rows = (0..3)
            .map(|i| [("drupal_nid".to_string(), json!(i))].into_iter().collect())
            .collect();
        let source = MemorySource::new(rows);
        let job = MigrationJob::new(EntityKind::Post, RunMode::Import, 2, JobArgs::default());

        assert_eq!(source.fetch_page(&job, 0, 2).await.unwrap().len(), 2);
        assert_eq!(source.fetch_page(&job, 2, 2).await.unwrap().len(), 1);
        assert!(source.fetch_page(&job, 10, 2).await.unwrap().is_empty());
        assert_eq!(source.page_sizes(), vec![2, 1, 0]);
    }
}
