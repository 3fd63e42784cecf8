//! Record sink: the create/update operation the runner calls per item.
//!
//! Target fields go into the primary write. Origin fields are attached
//! afterwards as `_drupal_*` metadata on the new record id.

use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::EntityKind;
use crate::record::{meta_string, EntityRecord, TargetId};
use crate::store::TargetStore;

/// What the sink did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// A new record was created.
    Created(TargetId),
    /// The origin id was already migrated; nothing was written.
    AlreadyMigrated(TargetId),
    /// An existing record was patched.
    Updated(TargetId),
}

impl SinkOutcome {
    /// Target record id.
    #[must_use]
    pub const fn id(self) -> TargetId {
        match self {
            Self::Created(id) | Self::AlreadyMigrated(id) | Self::Updated(id) => id,
        }
    }
}

/// Idempotent writer in front of a [`TargetStore`].
#[derive(Clone)]
pub struct RecordSink {
    store: Arc<dyn TargetStore>,
    skip_migrated: bool,
}

impl RecordSink {
    /// Creates a sink. With `skip_migrated`, records whose primary origin id is
    /// already stored as metadata are not inserted again.
    #[must_use]
    pub fn new(store: Arc<dyn TargetStore>, skip_migrated: bool) -> Self {
        Self {
            store,
            skip_migrated,
        }
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    /// `_<origin key>` and its value, when the record carries its primary origin id.
    fn primary_meta(kind: EntityKind, record: &EntityRecord) -> Option<(String, String)> {
        let key = kind.origin_key();
        record
            .origin
            .get(key)
            .map(|value| (format!("_{key}"), meta_string(value)))
            .filter(|(_, value)| !value.is_empty() && value != "0")
    }

    /// Creates a target record and attaches its origin metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkWrite`] if the store rejects the record or a metadata entry.
    pub async fn insert(&self, kind: EntityKind, record: &EntityRecord) -> Result<SinkOutcome> {
        if self.skip_migrated {
            if let Some((key, value)) = Self::primary_meta(kind, record) {
                if let Some(id) = self.store.find_by_meta(kind, &key, &value).await? {
                    debug!("{} {} = {} already migrated as {}", kind, key, value, id);
                    return Ok(SinkOutcome::AlreadyMigrated(id));
                }
            }
        }

        let id = self.store.create(kind, &record.fields).await?;
        for (key, value) in record.metadata() {
            self.store.add_meta(kind, id, &key, value).await?;
        }
        Ok(SinkOutcome::Created(id))
    }

    /// Patches an existing record identified by `record.target_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkWrite`] if the record has no target id or the store rejects the update.
    pub async fn update(&self, kind: EntityKind, record: &EntityRecord) -> Result<SinkOutcome> {
        let id = record
            .target_id
            .ok_or_else(|| Error::SinkWrite(format!("{kind} has no target id to update")))?;
        self.store.update(kind, id, &record.fields).await?;
        Ok(SinkOutcome::Updated(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn post(nid: u64) -> EntityRecord {
        let mut record = EntityRecord::default();
        record.set_origin("drupal_nid", nid);
        record.set_origin("drupal_uid", 3);
        record.set_field("post_title", "Hello");
        record
    }

    #[tokio::test]
    async fn test_origin_fields_become_metadata() {
        let store = Arc::new(MemoryStore::new());
        let sink = RecordSink::new(store.clone(), true);

        let outcome = sink.insert(EntityKind::Post, &post(7)).await.unwrap();

        let id = outcome.id();
        let fields = store.record(EntityKind::Post, id).unwrap();
        assert!(fields.keys().all(|k| !k.starts_with("drupal_")));
        assert_eq!(
            store.meta(EntityKind::Post, id),
            vec![
                ("_drupal_nid".to_string(), "7".to_string()),
                ("_drupal_uid".to_string(), "3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rerun_is_skipped_when_enabled() {
        let store = Arc::new(MemoryStore::new());
        let sink = RecordSink::new(store.clone(), true);

        let first = sink.insert(EntityKind::Post, &post(7)).await.unwrap();
        let second = sink.insert(EntityKind::Post, &post(7)).await.unwrap();

        assert_eq!(second, SinkOutcome::AlreadyMigrated(first.id()));
        assert_eq!(store.count(EntityKind::Post), 1);
    }

    #[tokio::test]
    async fn test_duplicates_allowed_when_disabled() {
        let store = Arc::new(MemoryStore::new());
        let sink = RecordSink::new(store.clone(), false);

        sink.insert(EntityKind::Post, &post(7)).await.unwrap();
        let second = sink.insert(EntityKind::Post, &post(7)).await.unwrap();

        assert!(matches!(second, SinkOutcome::Created(_)));
        assert_eq!(store.count(EntityKind::Post), 2);
    }

    #[tokio::test]
    async fn test_rejected_record_is_a_sink_error() {
        let sink = RecordSink::new(Arc::new(MemoryStore::new()), true);
        let mut empty = EntityRecord::default();
        empty.set_origin("drupal_nid", 1);

        let err = sink.insert(EntityKind::Post, &empty).await.unwrap_err();

        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_update_requires_target_id() {
        let store = Arc::new(MemoryStore::new());
        let sink = RecordSink::new(store.clone(), true);
        let created = sink.insert(EntityKind::Post, &post(1)).await.unwrap().id();

        let mut record = EntityRecord::default();
        record.set_field("post_content", json!("patched"));
        assert!(sink.update(EntityKind::Post, &record).await.is_err());

        record.target_id = Some(created);
        assert_eq!(
            sink.update(EntityKind::Post, &record).await.unwrap(),
            SinkOutcome::Updated(created)
        );
        assert_eq!(
            store.record(EntityKind::Post, created).unwrap()["post_content"],
            json!("patched")
        );
    }
}
