//! Drupal uid -> WordPress user id lookup used by `assign_post_author`.
//!
//! The table is built from the `_drupal_user_id` metadata of already-imported
//! users the first time a post needs it and is never rebuilt for the lifetime
//! of the cache. Users imported after the cache was built are not seen by it,
//! so users must be migrated before posts.

use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::EntityKind;
use crate::parser::coerce_uint;
use crate::record::TargetId;
use crate::store::TargetStore;

/// Drupal uid -> WordPress user id.
pub type AuthorMap = HashMap<u64, TargetId>;

/// Meta key the user importer stores Drupal uids under.
pub const USER_ID_META_KEY: &str = "_drupal_user_id";

/// Lazily-built, never-invalidated author table. Owned by the runner.
#[derive(Debug, Default)]
pub struct AuthorCache {
    map: OnceCell<AuthorMap>,
}

impl AuthorCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table, querying the store on first use only.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata lookup fails. A failed load is retried on the next call.
    pub async fn get_or_load(&self, store: &dyn TargetStore) -> Result<&AuthorMap> {
        self.map
            .get_or_try_init(|| async {
                let pairs = store.meta_index(EntityKind::User, USER_ID_META_KEY).await?;
                let map: AuthorMap = pairs
                    .into_iter()
                    .map(|(uid, user_id)| (coerce_uint(&serde_json::Value::String(uid)), user_id))
                    .collect();
                debug!("Loaded {} Drupal author mappings", map.len());
                Ok::<_, Error>(map)
            })
            .await
    }

    /// The table if it was already loaded.
    #[must_use]
    pub fn get(&self) -> Option<&AuthorMap> {
        self.map.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::TargetStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_cache_is_built_once() {
        let store = MemoryStore::new();
        store
            .add_meta(EntityKind::User, TargetId(42), USER_ID_META_KEY, &json!(5))
            .await
            .unwrap();
        let cache = AuthorCache::new();

        let first = cache.get_or_load(&store).await.unwrap().clone();
        store
            .add_meta(EntityKind::User, TargetId(43), USER_ID_META_KEY, &json!(6))
            .await
            .unwrap();
        let second = cache.get_or_load(&store).await.unwrap();

        assert_eq!(first.get(&5), Some(&TargetId(42)));
        assert_eq!(second, &first);
        assert!(second.get(&6).is_none());
        assert_eq!(store.meta_index_calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_starts_empty() {
        let cache = AuthorCache::new();
        assert!(cache.get().is_none());
    }
}
