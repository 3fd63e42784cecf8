//! Parameter-bound SELECT builder and the query extension points.
//!
//! Identifiers (tables, columns, join conditions, raw predicates) are
//! `&'static str` or come from a validated table prefix. Every value coming
//! from configuration or a hook is bound as a `?` parameter.

use std::fmt;

use crate::registry::HookRegistry;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bind {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Text.
    Text(String),
}

impl From<i64> for Bind {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Bind {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One `WHERE` condition with its bound values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    sql: String,
    binds: Vec<Bind>,
}

impl Predicate {
    /// A constant condition such as `n.status = 1`.
    #[must_use]
    pub fn raw(sql: &'static str) -> Self {
        Self {
            sql: sql.to_string(),
            binds: Vec::new(),
        }
    }

    /// `column = ?`.
    #[must_use]
    pub fn eq(column: &'static str, value: impl Into<Bind>) -> Self {
        Self {
            sql: format!("{column} = ?"),
            binds: vec![value.into()],
        }
    }

    /// `column <> ?`.
    #[must_use]
    pub fn not_eq(column: &'static str, value: impl Into<Bind>) -> Self {
        Self {
            sql: format!("{column} <> ?"),
            binds: vec![value.into()],
        }
    }

    /// `column LIKE ?`.
    #[must_use]
    pub fn like(column: &'static str, pattern: impl Into<Bind>) -> Self {
        Self {
            sql: format!("{column} LIKE ?"),
            binds: vec![pattern.into()],
        }
    }

    /// `column IN (?, ?, ...)`. An empty list matches nothing.
    #[must_use]
    pub fn in_list<I, V>(column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bind>,
    {
        let binds: Vec<Bind> = values.into_iter().map(Into::into).collect();
        if binds.is_empty() {
            return Self::raw("1 = 0");
        }
        let placeholders = vec!["?"; binds.len()].join(", ");
        Self {
            sql: format!("{column} IN ({placeholders})"),
            binds,
        }
    }

    /// Rendered SQL fragment.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// `INNER` or `LEFT` join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: &'static str,
    on: &'static str,
}

/// A `SELECT ... FROM ... [JOIN ...] WHERE ... ORDER BY ... LIMIT` statement.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    columns: Vec<&'static str>,
    from: String,
    alias: &'static str,
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
    order_by: Vec<&'static str>,
    page: Option<(u64, usize)>,
}

impl SelectQuery {
    /// Starts a query over `table AS alias`.
    #[must_use]
    pub fn from(table: impl Into<String>, alias: &'static str) -> Self {
        Self {
            columns: Vec::new(),
            from: table.into(),
            alias,
            joins: Vec::new(),
            predicates: Vec::new(),
            order_by: Vec::new(),
            page: None,
        }
    }

    /// Adds a select expression, e.g. `n.nid AS drupal_nid`.
    pub fn column(&mut self, expr: &'static str) -> &mut Self {
        self.columns.push(expr);
        self
    }

    /// Adds several select expressions.
    pub fn columns(&mut self, exprs: &[&'static str]) -> &mut Self {
        self.columns.extend_from_slice(exprs);
        self
    }

    /// Adds a join.
    pub fn join(
        &mut self,
        kind: JoinKind,
        table: impl Into<String>,
        alias: &'static str,
        on: &'static str,
    ) -> &mut Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            alias,
            on,
        });
        self
    }

    /// Adds a `WHERE` condition. Conditions are joined with `AND`.
    pub fn filter(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds an ordering key.
    pub fn order_by(&mut self, key: &'static str) -> &mut Self {
        self.order_by.push(key);
        self
    }

    /// Restricts the result to `limit` rows starting at `offset`.
    pub fn page(&mut self, offset: u64, limit: usize) -> &mut Self {
        self.page = Some((offset, limit));
        self
    }

    /// Current select expressions.
    #[must_use]
    pub fn selected(&self) -> &[&'static str] {
        &self.columns
    }

    /// Current conditions.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    fn render_body(&self, out: &mut String) {
        out.push_str(" FROM ");
        out.push_str(&self.from);
        out.push_str(" AS ");
        out.push_str(self.alias);
        for join in &self.joins {
            out.push_str(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            out.push_str(&join.table);
            out.push_str(" AS ");
            out.push_str(join.alias);
            out.push_str(" ON ");
            out.push_str(join.on);
        }
        if !self.predicates.is_empty() {
            out.push_str(" WHERE ");
            let conditions: Vec<&str> = self.predicates.iter().map(Predicate::sql).collect();
            out.push_str(&conditions.join(" AND "));
        }
    }

    /// `SELECT COUNT(*)` over the same tables and conditions.
    #[must_use]
    pub fn count_sql(&self) -> String {
        let mut sql = String::from("SELECT COUNT(*)");
        self.render_body(&mut sql);
        sql
    }

    /// Full statement with ordering and paging.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        self.render_body(&mut sql);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if self.page.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
        }
        sql
    }

    /// Values for the `?` placeholders of [`count_sql`](Self::count_sql).
    #[must_use]
    pub fn count_binds(&self) -> Vec<Bind> {
        self.predicates
            .iter()
            .flat_map(|p| p.binds.iter().cloned())
            .collect()
    }

    /// Values for the `?` placeholders of [`to_sql`](Self::to_sql).
    #[must_use]
    pub fn binds(&self) -> Vec<Bind> {
        let mut binds = self.count_binds();
        if let Some((offset, limit)) = self.page {
            binds.push(Bind::UInt(limit as u64));
            binds.push(Bind::UInt(offset));
        }
        binds
    }
}

/// Origin queries open to extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPoint {
    /// Count of published nodes.
    PostsCount,
    /// Page of node ids.
    PostsIds,
    /// Count of permanent files.
    ImagesCount,
    /// Page of files.
    ImagesSelect,
    /// Count of users.
    UsersCount,
    /// Page of users.
    UsersSelect,
}

impl fmt::Display for QueryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PostsCount => "posts.count",
            Self::PostsIds => "posts.ids",
            Self::ImagesCount => "images.count",
            Self::ImagesSelect => "images.select",
            Self::UsersCount => "users.count",
            Self::UsersSelect => "users.select",
        })
    }
}

/// Signature of a query hook.
pub type QueryHookFn = Box<dyn Fn(&mut SelectQuery) + Send + Sync>;

/// Query mutators, run in priority order right before a query is executed.
#[derive(Default)]
pub struct QueryHooks {
    hooks: HookRegistry<QueryPoint, QueryHookFn>,
}

impl QueryHooks {
    /// Creates an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` at `point`.
    pub fn register<F>(&mut self, point: QueryPoint, name: &str, hook: F, priority: i32)
    where
        F: Fn(&mut SelectQuery) + Send + Sync + 'static,
    {
        self.hooks.register(point, name, Box::new(hook), priority);
    }

    /// Removes hooks registered under `name` at `point`.
    pub fn unregister(&mut self, point: QueryPoint, name: &str) -> usize {
        self.hooks.unregister(&point, name)
    }

    /// Runs every hook at `point` on `query`.
    pub fn apply(&self, point: QueryPoint, query: &mut SelectQuery) {
        for (_, hook) in self.hooks.steps(&point) {
            hook(query);
        }
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
