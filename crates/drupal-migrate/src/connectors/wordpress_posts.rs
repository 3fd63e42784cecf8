//! Existing WordPress posts that embed images, scanned by the validator.

use async_trait::async_trait;
use sqlx::MySqlPool;

use super::mysql::{fetch_count, fetch_rows};
use super::query::{Predicate, SelectQuery};
use super::RowSource;
use crate::error::Result;
use crate::job::MigrationJob;
use crate::record::RawRow;

/// `LIKE` pattern selecting posts with an `<img` tag.
pub const IMAGE_TAG_PATTERN: &str = "%<img%";

/// Posts whose content contains an image tag, ordered by `ID`.
pub struct WordPressPosts {
    pool: MySqlPool,
    table: String,
}

impl WordPressPosts {
    /// Creates the source. `table_prefix` must already be validated.
    #[must_use]
    pub fn new(pool: MySqlPool, table_prefix: &str) -> Self {
        Self {
            pool,
            table: format!("{table_prefix}posts"),
        }
    }

    /// Scan query.
    #[must_use]
    pub fn query(&self) -> SelectQuery {
        let mut query = SelectQuery::from(self.table.clone(), "p");
        query.filter(Predicate::like("p.post_content", IMAGE_TAG_PATTERN));
        query
    }
}

#[async_trait]
impl RowSource for WordPressPosts {
    fn name(&self) -> &'static str {
        "wordpress posts"
    }

    async fn count(&self, _job: &MigrationJob) -> Result<u64> {
        fetch_count(&self.pool, &self.query()).await
    }

    async fn fetch_page(&self, _job: &MigrationJob, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        let mut query = self.query();
        query
            .columns(&["p.ID AS ID", "p.post_content AS post_content"])
            .order_by("p.ID")
            .page(offset, limit);
        fetch_rows(&self.pool, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::query::Bind;

    #[tokio::test]
    async fn test_scan_query_uses_prefix_and_bound_pattern() {
        let pool = MySqlPool::connect_lazy("mysql://u:p@localhost/wordpress").unwrap();
        let source = WordPressPosts::new(pool, "wp2_");

        let query = source.query();

        assert_eq!(
            query.count_sql(),
            "SELECT COUNT(*) FROM wp2_posts AS p WHERE p.post_content LIKE ?"
        );
        assert_eq!(query.count_binds(), vec![Bind::Text("%<img%".into())]);
    }
}
