//! Drupal 7 `file_managed` rows.

use async_trait::async_trait;
use sqlx::MySqlPool;
use std::sync::Arc;

use super::mysql::{fetch_count, fetch_rows};
use super::query::{Predicate, QueryHooks, QueryPoint, SelectQuery};
use super::RowSource;
use crate::error::Result;
use crate::job::MigrationJob;
use crate::record::RawRow;

const COLUMNS: &[&str] = &[
    "fm.fid AS drupal_file_id",
    "fm.uid AS drupal_user_id",
    "fm.uri AS drupal_file_path",
    "fm.filename AS post_title",
    "fm.timestamp AS post_date",
    "fm.filemime AS post_mime_type",
];

/// Permanent managed files.
pub struct DrupalImages {
    pool: MySqlPool,
    hooks: Arc<QueryHooks>,
}

impl DrupalImages {
    /// Creates the source.
    #[must_use]
    pub fn new(pool: MySqlPool, hooks: Arc<QueryHooks>) -> Self {
        Self { pool, hooks }
    }

    fn base() -> SelectQuery {
        let mut query = SelectQuery::from("file_managed", "fm");
        query.filter(Predicate::raw("fm.status = 1"));
        query
    }

    /// Count query after hooks.
    #[must_use]
    pub fn count_query(&self) -> SelectQuery {
        let mut query = Self::base();
        self.hooks.apply(QueryPoint::ImagesCount, &mut query);
        query
    }

    /// Page query after hooks.
    #[must_use]
    pub fn page_query(&self, offset: u64, limit: usize) -> SelectQuery {
        let mut query = Self::base();
        query.columns(COLUMNS).order_by("fm.fid").page(offset, limit);
        self.hooks.apply(QueryPoint::ImagesSelect, &mut query);
        query
    }
}

#[async_trait]
impl RowSource for DrupalImages {
    fn name(&self) -> &'static str {
        "drupal images"
    }

    async fn count(&self, _job: &MigrationJob) -> Result<u64> {
        fetch_count(&self.pool, &self.count_query()).await
    }

    async fn fetch_page(&self, _job: &MigrationJob, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        fetch_rows(&self.pool, &self.page_query(offset, limit)).await
    }
}
