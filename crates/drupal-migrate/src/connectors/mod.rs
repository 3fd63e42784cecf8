//! Paginated row sources over the Drupal origin schema and the WordPress target.

pub mod drupal_images;
pub mod drupal_posts;
pub mod drupal_users;
pub mod memory;
pub mod mysql;
pub mod query;
pub mod wordpress_posts;

use async_trait::async_trait;
use sqlx::MySqlPool;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::job::{EntityKind, MigrationJob, RunMode};
use crate::record::RawRow;

pub use query::{Predicate, QueryHooks, QueryPoint, SelectQuery};

/// Trait for row sources.
///
/// `count` and `fetch_page` apply the same predicates, and pages are ordered
/// by the origin primary id, so fetching `[0, count)` in `limit` steps yields
/// every matching row exactly once.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Total number of rows matching the job's filters.
    async fn count(&self, job: &MigrationJob) -> Result<u64>;

    /// Up to `limit` rows starting at `offset`.
    async fn fetch_page(&self, job: &MigrationJob, offset: u64, limit: usize) -> Result<Vec<RawRow>>;
}

/// Connections and hooks available to the source factory.
#[derive(Clone)]
pub struct SourceContext {
    /// Drupal database, needed for imports.
    pub origin: Option<MySqlPool>,
    /// WordPress database, needed for validation.
    pub target: Option<MySqlPool>,
    /// WordPress table prefix.
    pub table_prefix: String,
    /// Query extension points.
    pub hooks: Arc<QueryHooks>,
}

/// Create the row source for a job.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unsupported kind/mode combination or a missing pool.
pub fn create_source(kind: EntityKind, mode: RunMode, ctx: &SourceContext) -> Result<Box<dyn RowSource>> {
    let missing = |which: &str| Error::Config(format!("no {which} database connection for {kind} {mode}"));
    match (mode, kind) {
        (RunMode::Import, _) => {
            let pool = ctx.origin.clone().ok_or_else(|| missing("origin"))?;
            let hooks = ctx.hooks.clone();
            Ok(match kind {
                EntityKind::Post => Box::new(drupal_posts::DrupalPosts::new(pool, hooks)),
                EntityKind::Image => Box::new(drupal_images::DrupalImages::new(pool, hooks)),
                EntityKind::User => Box::new(drupal_users::DrupalUsers::new(pool, hooks)),
            })
        }
        (RunMode::Validate, EntityKind::Post) => {
            let pool = ctx.target.clone().ok_or_else(|| missing("target"))?;
            Ok(Box::new(wordpress_posts::WordPressPosts::new(
                pool,
                &ctx.table_prefix,
            )))
        }
        (RunMode::Validate, other) => Err(Error::Config(format!(
            "validation is only available for posts, not {}",
            other.plural()
        ))),
    }
}
