//! Drupal 7 nodes with a body field.
//!
//! A page is fetched in three steps: the ordered node ids of the page, the
//! hydrated node + body rows for those ids (same order), then the URL aliases
//! of each node in `pid` order.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::MySqlPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::mysql::{fetch_count, fetch_rows};
use super::query::{JoinKind, Predicate, QueryHooks, QueryPoint, SelectQuery};
use super::RowSource;
use crate::error::Result;
use crate::job::MigrationJob;
use crate::parser::coerce_uint;
use crate::record::RawRow;

const HYDRATED_COLUMNS: &[&str] = &[
    "n.changed AS post_modified",
    "IF(n.comment = 2, 'open', 'closed') AS comment_status",
    "n.created AS post_date",
    "n.nid AS drupal_nid",
    "n.sticky AS drupal_sticky",
    "n.title AS post_title",
    "n.type AS post_type",
    "n.uid AS drupal_uid",
    "fdb.body_value AS post_content",
    "fdb.body_summary AS post_excerpt",
];

/// Published nodes joined with `field_data_body`.
pub struct DrupalPosts {
    pool: MySqlPool,
    hooks: Arc<QueryHooks>,
}

impl DrupalPosts {
    /// Creates the source.
    #[must_use]
    pub fn new(pool: MySqlPool, hooks: Arc<QueryHooks>) -> Self {
        Self { pool, hooks }
    }

    fn base(job: &MigrationJob) -> SelectQuery {
        let mut query = SelectQuery::from("node", "n");
        query
            .join(JoinKind::Inner, "field_data_body", "fdb", "n.nid = fdb.entity_id")
            .filter(Predicate::raw("n.status = 1"));
        if let Some(types) = job.args.entity_type.types() {
            query.filter(Predicate::in_list("n.type", types.iter().map(String::as_str)));
        }
        query
    }

    /// Count query after hooks.
    #[must_use]
    pub fn count_query(&self, job: &MigrationJob) -> SelectQuery {
        let mut query = Self::base(job);
        self.hooks.apply(QueryPoint::PostsCount, &mut query);
        query
    }

    /// Id page query after hooks.
    #[must_use]
    pub fn ids_query(&self, job: &MigrationJob, offset: u64, limit: usize) -> SelectQuery {
        let mut query = Self::base(job);
        query.column("n.nid").order_by("n.nid").page(offset, limit);
        self.hooks.apply(QueryPoint::PostsIds, &mut query);
        query
    }

    /// Hydration query for a set of node ids.
    #[must_use]
    pub fn hydrate_query(ids: &[u64]) -> SelectQuery {
        let mut query = SelectQuery::from("node", "n");
        query
            .columns(HYDRATED_COLUMNS)
            .join(JoinKind::Inner, "field_data_body", "fdb", "n.nid = fdb.entity_id")
            .filter(Predicate::in_list("n.nid", ids.iter().copied()))
            .order_by("n.nid");
        query
    }

    /// Alias query for one node.
    #[must_use]
    pub fn aliases_query(nid: u64) -> SelectQuery {
        let mut query = SelectQuery::from("url_alias", "ua");
        query
            .column("ua.alias AS alias")
            .filter(Predicate::eq("ua.source", format!("node/{nid}")))
            .order_by("ua.pid");
        query
    }

    async fn aliases(&self, nid: u64) -> Result<Value> {
        let rows = fetch_rows(&self.pool, &Self::aliases_query(nid)).await?;
        Ok(Value::Array(
            rows.into_iter()
                .map(|row| Value::Object(row.into_iter().collect()))
                .collect(),
        ))
    }
}

/// Orders hydrated rows like `ids`. Rows for ids that vanished are dropped.
pub(crate) fn order_like(ids: &[u64], rows: Vec<RawRow>) -> Vec<RawRow> {
    let mut by_id: BTreeMap<u64, Vec<RawRow>> = BTreeMap::new();
    for row in rows {
        let nid = row.get("drupal_nid").map_or(0, coerce_uint);
        by_id.entry(nid).or_default().push(row);
    }
    ids.iter()
        .filter_map(|id| by_id.remove(id))
        .flatten()
        .collect()
}

#[async_trait]
impl RowSource for DrupalPosts {
    fn name(&self) -> &'static str {
        "drupal posts"
    }

    async fn count(&self, job: &MigrationJob) -> Result<u64> {
        fetch_count(&self.pool, &self.count_query(job)).await
    }

    async fn fetch_page(&self, job: &MigrationJob, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        let ids: Vec<u64> = fetch_rows(&self.pool, &self.ids_query(job, offset, limit))
            .await?
            .iter()
            .filter_map(|row| row.get("nid").map(coerce_uint))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Hydrating {} nodes starting at nid {}", ids.len(), ids[0]);

        let rows = fetch_rows(&self.pool, &Self::hydrate_query(&ids)).await?;
        let mut rows = order_like(&ids, rows);
        for row in &mut rows {
            let nid = row.get("drupal_nid").map_or(0, coerce_uint);
            let aliases = self.aliases(nid).await?;
            row.insert("url_alias".to_string(), aliases);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EntityKind, JobArgs, EntityTypeFilter, RunMode};
    use crate::connectors::query::Bind;
    use serde_json::json;

    fn job(filter: &str) -> MigrationJob {
        MigrationJob::new(
            EntityKind::Post,
            RunMode::Import,
            100,
            JobArgs {
                entity_type: EntityTypeFilter::parse(filter),
                limit: None,
            },
        )
    }

    #[test]
    fn test_base_query_filters_and_type_list() {
        let all = DrupalPosts::base(&job("all"));
        assert_eq!(
            all.count_sql(),
            "SELECT COUNT(*) FROM node AS n INNER JOIN field_data_body AS fdb ON n.nid = fdb.entity_id WHERE n.status = 1"
        );

        let some = DrupalPosts::base(&job("article, page"));
        assert!(some.count_sql().ends_with("AND n.type IN (?, ?)"));
        assert_eq!(
            some.count_binds(),
            vec![Bind::Text("article".into()), Bind::Text("page".into())]
        );
    }

    #[test]
    fn test_hydrate_query_is_ordered_by_nid() {
        let query = DrupalPosts::hydrate_query(&[3, 1]);
        let sql = query.to_sql();
        assert!(sql.contains("IF(n.comment = 2, 'open', 'closed') AS comment_status"));
        assert!(sql.ends_with("WHERE n.nid IN (?, ?) ORDER BY n.nid"));
        assert_eq!(query.binds(), vec![Bind::UInt(3), Bind::UInt(1)]);
    }

    #[test]
    fn test_aliases_query_binds_source_path() {
        let query = DrupalPosts::aliases_query(12);
        assert_eq!(
            query.to_sql(),
            "SELECT ua.alias AS alias FROM url_alias AS ua WHERE ua.source = ? ORDER BY ua.pid"
        );
        assert_eq!(query.binds(), vec![Bind::Text("node/12".into())]);
    }

    #[test]
    fn test_order_like_follows_id_page() {
        let row = |nid: u64| -> RawRow { [("drupal_nid".to_string(), json!(nid))].into_iter().collect() };
        let ordered = order_like(&[5, 2, 9], vec![row(2), row(9), row(5)]);
        let nids: Vec<u64> = ordered.iter().map(|r| coerce_uint(&r["drupal_nid"])).collect();
        assert_eq!(nids, vec![5, 2, 9]);
    }
}
