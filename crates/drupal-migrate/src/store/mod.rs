//! Target store abstraction.
//!
//! WordPress is modelled as create/update by id plus key-value metadata
//! attached to a record. Posts and images share the posts table; users have
//! their own table and metadata table.

pub mod dry_run;
pub mod memory;
pub mod wordpress;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::job::EntityKind;
use crate::record::{Fields, TargetId};

/// Trait for target stores.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Creates a record from target fields and returns its id.
    async fn create(&self, kind: EntityKind, fields: &Fields) -> Result<TargetId>;

    /// Patches an existing record.
    async fn update(&self, kind: EntityKind, id: TargetId, fields: &Fields) -> Result<()>;

    /// Attaches a metadata entry to a record.
    async fn add_meta(&self, kind: EntityKind, id: TargetId, key: &str, value: &Value) -> Result<()>;

    /// First record carrying `key = value` metadata.
    async fn find_by_meta(&self, kind: EntityKind, key: &str, value: &str) -> Result<Option<TargetId>>;

    /// Every `(value, record id)` pair stored under `key`.
    async fn meta_index(&self, kind: EntityKind, key: &str) -> Result<Vec<(String, TargetId)>>;

    /// Public URL of an attachment.
    async fn attachment_url(&self, id: TargetId) -> Result<Option<String>>;

    /// Runs the recalculations deferred during an import.
    async fn finish_import(&self) -> Result<()> {
        Ok(())
    }

    /// Shared deferral flags consulted by the write path.
    fn state(&self) -> &StoreState;
}

/// Process-wide recalculation toggles of a store.
#[derive(Debug, Default)]
pub struct StoreState {
    defer_term_counting: AtomicBool,
    defer_comment_counting: AtomicBool,
    suspend_cache_invalidation: AtomicBool,
}

/// Snapshot of the [`StoreState`] flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deferrals {
    /// Term counts are not recalculated per write.
    pub term_counting: bool,
    /// Comment counts are not recalculated per write.
    pub comment_counting: bool,
    /// Read caches are not invalidated per write.
    pub cache_invalidation: bool,
}

impl Deferrals {
    /// Everything deferred.
    pub const ALL: Self = Self {
        term_counting: true,
        comment_counting: true,
        cache_invalidation: true,
    };
}

impl StoreState {
    /// Current flags.
    #[must_use]
    pub fn snapshot(&self) -> Deferrals {
        Deferrals {
            term_counting: self.defer_term_counting.load(Ordering::SeqCst),
            comment_counting: self.defer_comment_counting.load(Ordering::SeqCst),
            cache_invalidation: self.suspend_cache_invalidation.load(Ordering::SeqCst),
        }
    }

    fn apply(&self, flags: Deferrals) {
        self.defer_term_counting
            .store(flags.term_counting, Ordering::SeqCst);
        self.defer_comment_counting
            .store(flags.comment_counting, Ordering::SeqCst);
        self.suspend_cache_invalidation
            .store(flags.cache_invalidation, Ordering::SeqCst);
    }
}

/// Scoped deferral. Restores the previous flags when dropped, on every exit path.
#[must_use = "the deferral ends as soon as the guard is dropped"]
pub struct DeferGuard {
    store: Arc<dyn TargetStore>,
    previous: Deferrals,
}

impl DeferGuard {
    /// Sets `flags` on the store until the guard is dropped.
    pub fn begin(store: Arc<dyn TargetStore>, flags: Deferrals) -> Self {
        let previous = store.state().snapshot();
        store.state().apply(flags);
        debug!("Deferring recalculations: {:?}", flags);
        Self { store, previous }
    }
}

impl Drop for DeferGuard {
    fn drop(&mut self) {
        self.store.state().apply(self.previous);
        debug!("Restored recalculation flags: {:?}", self.previous);
    }
}

/// Validation shared by every store, mirroring what WordPress rejects.
pub(crate) fn check_insertable(kind: EntityKind, fields: &Fields) -> std::result::Result<(), String> {
    let is_blank = |name: &str| {
        fields
            .get(name)
            .and_then(Value::as_str)
            .map_or(true, |s| s.trim().is_empty())
    };
    match kind {
        EntityKind::Post => {
            if is_blank("post_title") && is_blank("post_content") && is_blank("post_excerpt") {
                return Err("Content, title, and excerpt are empty.".to_string());
            }
        }
        EntityKind::Image => {
            if is_blank("attached_file") {
                return Err("Attachment has no file path.".to_string());
            }
        }
        EntityKind::User => {
            if is_blank("user_login") {
                return Err("Cannot create a user with an empty login name.".to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_guard_restores_flags_on_drop() {
        let store: Arc<dyn TargetStore> = Arc::new(MemoryStore::new());
        {
            let _guard = DeferGuard::begin(store.clone(), Deferrals::ALL);
            assert_eq!(store.state().snapshot(), Deferrals::ALL);
        }
        assert_eq!(store.state().snapshot(), Deferrals::default());
    }

    #[test]
    fn test_guard_restores_flags_on_panic() {
        let store: Arc<dyn TargetStore> = Arc::new(MemoryStore::new());
        let inner = store.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = DeferGuard::begin(inner, Deferrals::ALL);
            panic!("item blew up");
        }));
        assert!(result.is_err());
        assert_eq!(store.state().snapshot(), Deferrals::default());
    }

    #[test]
    fn test_nested_guards_restore_outer_state() {
        let store: Arc<dyn TargetStore> = Arc::new(MemoryStore::new());
        let outer = DeferGuard::begin(
            store.clone(),
            Deferrals {
                term_counting: true,
                ..Default::default()
            },
        );
        {
            let _inner = DeferGuard::begin(store.clone(), Deferrals::ALL);
        }
        assert!(store.state().snapshot().term_counting);
        assert!(!store.state().snapshot().cache_invalidation);
        drop(outer);
        assert_eq!(store.state().snapshot(), Deferrals::default());
    }

    #[test]
    fn test_check_insertable() {
        let mut fields = Fields::new();
        assert!(check_insertable(EntityKind::Post, &fields).is_err());
        fields.insert("post_excerpt".into(), json!("summary"));
        assert!(check_insertable(EntityKind::Post, &fields).is_ok());
        assert!(check_insertable(EntityKind::User, &fields).is_err());
        fields.insert("user_login".into(), json!("jane"));
        assert!(check_insertable(EntityKind::User, &fields).is_ok());
    }
}
