//! In-memory target store.
//!
//! Applies the same validation rules as the WordPress store. Used by tests,
//! by embedding callers and as the write overlay of the dry-run store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{check_insertable, StoreState, TargetStore};
use crate::error::{Error, Result};
use crate::job::EntityKind;
use crate::record::{meta_string, Fields, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Table {
    Posts,
    Users,
}

impl From<EntityKind> for Table {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Post | EntityKind::Image => Self::Posts,
            EntityKind::User => Self::Users,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    next_post_id: u64,
    next_user_id: u64,
    rows: BTreeMap<(Table, TargetId), Fields>,
    meta: Vec<(Table, TargetId, String, String)>,
}

/// In-memory [`TargetStore`].
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    state: StoreState,
    uploads_url: String,
    meta_index_calls: AtomicUsize,
    finish_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_uploads_url("http://localhost/wp-content/uploads")
    }

    /// Creates an empty store serving attachments from `uploads_url`.
    #[must_use]
    pub fn with_uploads_url(uploads_url: impl Into<String>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            state: StoreState::default(),
            uploads_url: uploads_url.into().trim_end_matches('/').to_string(),
            meta_index_calls: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fields of a stored record.
    #[must_use]
    pub fn record(&self, kind: EntityKind, id: TargetId) -> Option<Fields> {
        self.tables().rows.get(&(kind.into(), id)).cloned()
    }

    /// Number of records of `kind`. Posts and images are counted by `post_type`.
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        let tables = self.tables();
        tables
            .rows
            .iter()
            .filter(|((table, _), fields)| {
                *table == Table::from(kind)
                    && match kind {
                        EntityKind::User => true,
                        EntityKind::Image => is_attachment(fields),
                        EntityKind::Post => !is_attachment(fields),
                    }
            })
            .count()
    }

    /// Metadata of a record, in insertion order.
    #[must_use]
    pub fn meta(&self, kind: EntityKind, id: TargetId) -> Vec<(String, String)> {
        let table = Table::from(kind);
        self.tables()
            .meta
            .iter()
            .filter(|(t, record, _, _)| *t == table && *record == id)
            .map(|(_, _, key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// How often [`TargetStore::meta_index`] was called.
    #[must_use]
    pub fn meta_index_calls(&self) -> usize {
        self.meta_index_calls.load(Ordering::SeqCst)
    }

    /// How often [`TargetStore::finish_import`] was called.
    #[must_use]
    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }
}

fn is_attachment(fields: &Fields) -> bool {
    fields.get("post_type").and_then(Value::as_str) == Some("attachment")
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn create(&self, kind: EntityKind, fields: &Fields) -> Result<TargetId> {
        check_insertable(kind, fields).map_err(Error::SinkWrite)?;

        let mut tables = self.tables();
        if kind == EntityKind::User {
            for unique in ["user_login", "user_email"] {
                let wanted = fields.get(unique).and_then(Value::as_str).unwrap_or_default();
                let taken = !wanted.is_empty()
                    && tables.rows.iter().any(|((table, _), row)| {
                        *table == Table::Users
                            && row.get(unique).and_then(Value::as_str) == Some(wanted)
                    });
                if taken {
                    return Err(Error::SinkWrite(format!(
                        "Sorry, that {} already exists!",
                        unique.trim_start_matches("user_")
                    )));
                }
            }
        }

        let counter = match Table::from(kind) {
            Table::Posts => &mut tables.next_post_id,
            Table::Users => &mut tables.next_user_id,
        };
        *counter += 1;
        let id = TargetId(*counter);

        let mut row = fields.clone();
        if kind == EntityKind::Image {
            row.insert("post_type".into(), Value::from("attachment"));
        }
        tables.rows.insert((kind.into(), id), row);
        Ok(id)
    }

    async fn update(&self, kind: EntityKind, id: TargetId, fields: &Fields) -> Result<()> {
        let mut tables = self.tables();
        let row = tables
            .rows
            .get_mut(&(kind.into(), id))
            .ok_or_else(|| Error::SinkWrite(format!("Invalid {kind} ID {id}.")))?;
        row.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn add_meta(&self, kind: EntityKind, id: TargetId, key: &str, value: &Value) -> Result<()> {
        self.tables()
            .meta
            .push((kind.into(), id, key.to_string(), meta_string(value)));
        Ok(())
    }

    async fn find_by_meta(&self, kind: EntityKind, key: &str, value: &str) -> Result<Option<TargetId>> {
        let table = Table::from(kind);
        Ok(self
            .tables()
            .meta
            .iter()
            .find(|(t, _, k, v)| *t == table && k == key && v == value)
            .map(|(_, id, _, _)| *id))
    }

    async fn meta_index(&self, kind: EntityKind, key: &str) -> Result<Vec<(String, TargetId)>> {
        self.meta_index_calls.fetch_add(1, Ordering::SeqCst);
        let table = Table::from(kind);
        Ok(self
            .tables()
            .meta
            .iter()
            .filter(|(t, _, k, _)| *t == table && k == key)
            .map(|(_, id, _, v)| (v.clone(), *id))
            .collect())
    }

    async fn attachment_url(&self, id: TargetId) -> Result<Option<String>> {
        let tables = self.tables();
        Ok(tables
            .rows
            .get(&(Table::Posts, id))
            .filter(|row| is_attachment(row))
            .and_then(|row| row.get("attached_file").and_then(Value::as_str))
            .map(|file| format!("{}/{}", self.uploads_url, file)))
    }

    async fn finish_import(&self) -> Result<()> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> &StoreState {
        &self.state
    }
}
