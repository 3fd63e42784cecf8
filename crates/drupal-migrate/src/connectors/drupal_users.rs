//! Drupal 7 users with their role assignments.
//!
//! A user with several roles yields one row per role; the count is taken
//! over the same join so that pagination stays consistent.

use async_trait::async_trait;
use sqlx::MySqlPool;
use std::sync::Arc;

use super::mysql::{fetch_count, fetch_rows};
use super::query::{JoinKind, Predicate, QueryHooks, QueryPoint, SelectQuery};
use super::RowSource;
use crate::error::Result;
use crate::job::MigrationJob;
use crate::record::RawRow;

const COLUMNS: &[&str] = &[
    "u.uid AS drupal_user_id",
    "u.name AS user_login",
    "u.mail AS user_email",
    "u.created AS user_registered",
    "u.status AS drupal_user_status",
    "ur.rid AS drupal_role_id",
];

/// Active, non-anonymous users.
pub struct DrupalUsers {
    pool: MySqlPool,
    hooks: Arc<QueryHooks>,
}

impl DrupalUsers {
    /// Creates the source.
    #[must_use]
    pub fn new(pool: MySqlPool, hooks: Arc<QueryHooks>) -> Self {
        Self { pool, hooks }
    }

    fn base() -> SelectQuery {
        let mut query = SelectQuery::from("users", "u");
        query
            .join(JoinKind::Left, "users_roles", "ur", "u.uid = ur.uid")
            .filter(Predicate::raw("u.uid <> 0"))
            .filter(Predicate::raw("u.status = 1"));
        query
    }

    /// Count query after hooks.
    #[must_use]
    pub fn count_query(&self) -> SelectQuery {
        let mut query = Self::base();
        self.hooks.apply(QueryPoint::UsersCount, &mut query);
        query
    }

    /// Page query after hooks.
    #[must_use]
    pub fn page_query(&self, offset: u64, limit: usize) -> SelectQuery {
        let mut query = Self::base();
        query
            .columns(COLUMNS)
            .order_by("u.uid")
            .order_by("ur.rid")
            .page(offset, limit);
        self.hooks.apply(QueryPoint::UsersSelect, &mut query);
        query
    }
}

#[async_trait]
impl RowSource for DrupalUsers {
    fn name(&self) -> &'static str {
        "drupal users"
    }

    async fn count(&self, _job: &MigrationJob) -> Result<u64> {
        fetch_count(&self.pool, &self.count_query()).await
    }

    async fn fetch_page(&self, _job: &MigrationJob, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        fetch_rows(&self.pool, &self.page_query(offset, limit)).await
    }
}
