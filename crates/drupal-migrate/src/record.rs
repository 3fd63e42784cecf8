//! Entity records flowing through the pipeline.
//!
//! A raw origin row mixes Drupal identifiers (`drupal_*` columns) with columns
//! already named after WordPress fields. [`EntityRecord::from_raw`] splits the
//! two namespaces at the parser boundary so that origin identifiers can never
//! leak into the primary write; the sink stores them as `_drupal_*` metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Prefix of origin-namespace fields.
pub const ORIGIN_PREFIX: &str = "drupal_";

/// A raw row as returned by a [`RowSource`](crate::connectors::RowSource), keyed by column alias.
pub type RawRow = BTreeMap<String, Value>;

/// Field map for either namespace.
pub type Fields = BTreeMap<String, Value>;

/// Opaque id of a record in the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u64);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record with origin identifiers separated from target fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// `drupal_*` fields, persisted as metadata.
    pub origin: Fields,
    /// Native target fields (title, content, dates, author, role, ...).
    pub fields: Fields,
    /// Set for records read back from the target store (validator mode).
    pub target_id: Option<TargetId>,
}

impl EntityRecord {
    /// Splits a raw row into origin and target namespaces.
    #[must_use]
    pub fn from_raw(row: RawRow) -> Self {
        let mut record = Self::default();
        for (key, value) in row {
            if key.starts_with(ORIGIN_PREFIX) {
                record.origin.insert(key, value);
            } else {
                record.fields.insert(key, value);
            }
        }
        record
    }

    /// Target field as a string slice, if it is a string.
    #[must_use]
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Sets a target field.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Origin field as an unsigned id.
    #[must_use]
    pub fn origin_id(&self, name: &str) -> Option<u64> {
        self.origin.get(name).and_then(Value::as_u64)
    }

    /// Sets an origin field. `name` must carry the [`ORIGIN_PREFIX`].
    pub fn set_origin(&mut self, name: &str, value: impl Into<Value>) {
        debug_assert!(name.starts_with(ORIGIN_PREFIX));
        self.origin.insert(name.to_string(), value.into());
    }

    /// Metadata entries the sink attaches: `_<origin field>` -> value.
    pub fn metadata(&self) -> impl Iterator<Item = (String, &Value)> {
        self.origin.iter().map(|(key, value)| (format!("_{key}"), value))
    }
}

/// Renders a metadata value the way it is stored in a `meta_value` column.
#[must_use]
pub fn meta_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
