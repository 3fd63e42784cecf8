//! MySQL plumbing shared by the origin sources and the WordPress store.

use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row};
use std::time::Duration;
use tracing::{debug, info};

use super::query::{Bind, SelectQuery};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::record::RawRow;
use crate::retry::{with_retry, RetryConfig};

const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens a pool, retrying transient failures.
///
/// # Errors
///
/// Returns [`Error::Connection`] once retries are exhausted or on a permanent failure.
pub async fn connect(db: &DatabaseConfig, retry: &RetryConfig) -> Result<MySqlPool> {
    let options = MySqlConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .username(&db.user)
        .password(&db.password)
        .database(&db.name)
        .charset("utf8mb4");

    let label = format!("connect {}@{}:{}/{}", db.user, db.host, db.port, db.name);
    let pool = with_retry(retry, &label, || {
        let options = options.clone();
        async move {
            MySqlPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await
                .map_err(|e| Error::Connection(e.to_string()))
        }
    })
    .await?;

    info!("Connected to MySQL database {} on {}", db.name, db.host);
    Ok(pool)
}

pub(crate) fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    binds: Vec<Bind>,
) -> Query<'q, MySql, MySqlArguments> {
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(v),
            Bind::UInt(v) => query.bind(v),
            Bind::Text(v) => query.bind(v),
        };
    }
    query
}

/// Converts a row into a column-alias keyed map.
///
/// Integers stay numbers, text and non-UTF-8 blobs become strings, `NULL` becomes `null`.
#[must_use]
pub fn decode_row(row: &MySqlRow) -> RawRow {
    row.columns()
        .iter()
        .map(|column| {
            let i = column.ordinal();
            (column.name().to_string(), decode_value(row, i))
        })
        .collect()
}

fn decode_value(row: &MySqlRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
        return v.map_or(Value::Null, |bytes| {
            Value::from(String::from_utf8_lossy(&bytes).into_owned())
        });
    }
    Value::Null
}

/// Runs the `COUNT(*)` form of `query`.
///
/// # Errors
///
/// Returns [`Error::SourceQuery`] if the query fails.
pub async fn fetch_count(pool: &MySqlPool, query: &SelectQuery) -> Result<u64> {
    let sql = query.count_sql();
    debug!("count: {}", sql);
    let row = bind_all(sqlx::query(&sql), query.count_binds())
        .fetch_one(pool)
        .await
        .map_err(Error::query_failed)?;
    let count: i64 = row.try_get(0).map_err(Error::query_failed)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Runs `query` and decodes every row.
///
/// # Errors
///
/// Returns [`Error::SourceQuery`] if the query fails.
pub async fn fetch_rows(pool: &MySqlPool, query: &SelectQuery) -> Result<Vec<RawRow>> {
    let sql = query.to_sql();
    debug!("select: {}", sql);
    let rows = bind_all(sqlx::query(&sql), query.binds())
        .fetch_all(pool)
        .await
        .map_err(Error::query_failed)?;
    Ok(rows.iter().map(decode_row).collect())
}
