//! Dry-run wrapper: reads hit the real store, writes land in an overlay.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::memory::MemoryStore;
use super::{StoreState, TargetStore};
use crate::error::Result;
use crate::job::EntityKind;
use crate::record::{Fields, TargetId};

/// Overlay ids start here, well above any id a real WordPress site has.
const OVERLAY_ID_BASE: u64 = 1 << 48;

/// Wraps a store so that nothing is written to it.
pub struct DryRunStore {
    inner: Arc<dyn TargetStore>,
    overlay: MemoryStore,
}

impl DryRunStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn TargetStore>) -> Self {
        Self {
            inner,
            overlay: MemoryStore::new(),
        }
    }

    /// Records that would have been written.
    #[must_use]
    pub fn overlay(&self) -> &MemoryStore {
        &self.overlay
    }

    fn is_overlay(id: TargetId) -> bool {
        id.0 >= OVERLAY_ID_BASE
    }

    fn to_overlay(id: TargetId) -> TargetId {
        TargetId(id.0.saturating_sub(OVERLAY_ID_BASE))
    }

    fn from_overlay(id: TargetId) -> TargetId {
        TargetId(id.0 + OVERLAY_ID_BASE)
    }
}

#[async_trait]
impl TargetStore for DryRunStore {
    async fn create(&self, kind: EntityKind, fields: &Fields) -> Result<TargetId> {
        let id = Self::from_overlay(self.overlay.create(kind, fields).await?);
        debug!("[dry-run] would create {} {}: {:?}", kind, id, fields);
        Ok(id)
    }

    async fn update(&self, kind: EntityKind, id: TargetId, fields: &Fields) -> Result<()> {
        debug!("[dry-run] would update {} {}: {:?}", kind, id, fields);
        if Self::is_overlay(id) {
            self.overlay.update(kind, Self::to_overlay(id), fields).await?;
        }
        Ok(())
    }

    async fn add_meta(&self, kind: EntityKind, id: TargetId, key: &str, value: &Value) -> Result<()> {
        debug!("[dry-run] would add {} meta {} = {} on {}", kind, key, value, id);
        if Self::is_overlay(id) {
            self.overlay
                .add_meta(kind, Self::to_overlay(id), key, value)
                .await?;
        }
        Ok(())
    }

    async fn find_by_meta(&self, kind: EntityKind, key: &str, value: &str) -> Result<Option<TargetId>> {
        if let Some(id) = self.overlay.find_by_meta(kind, key, value).await? {
            return Ok(Some(Self::from_overlay(id)));
        }
        self.inner.find_by_meta(kind, key, value).await
    }

    async fn meta_index(&self, kind: EntityKind, key: &str) -> Result<Vec<(String, TargetId)>> {
        let mut pairs = self.inner.meta_index(kind, key).await?;
        pairs.extend(
            self.overlay
                .meta_index(kind, key)
                .await?
                .into_iter()
                .map(|(value, id)| (value, Self::from_overlay(id))),
        );
        Ok(pairs)
    }

    async fn attachment_url(&self, id: TargetId) -> Result<Option<String>> {
        if Self::is_overlay(id) {
            return self.overlay.attachment_url(Self::to_overlay(id)).await;
        }
        self.inner.attachment_url(id).await
    }

    async fn finish_import(&self) -> Result<()> {
        debug!("[dry-run] skipping deferred recalculations");
        Ok(())
    }

    fn state(&self) -> &StoreState {
        self.inner.state()
    }
}
