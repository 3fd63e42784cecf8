//! Transform registry: named, priority-ordered record transforms.
//!
//! Every parsed record passes through the steps registered at its kind's
//! [`ExtensionPoint`] before it reaches the sink. Registration is explicit and
//! happens once at process start, see [`register_builtin`].

pub mod authors;
pub mod builtin;

use std::fmt;

use crate::config::MigrationOptions;
use crate::job::EntityKind;
use crate::record::EntityRecord;
use crate::registry::{HookRegistry, DEFAULT_PRIORITY};

pub use authors::{AuthorCache, AuthorMap};

/// Named slot where transforms are registered, one per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    /// Drupal nodes.
    Post,
    /// Drupal managed files.
    Image,
    /// Drupal users.
    User,
}

impl ExtensionPoint {
    /// Extension point for an entity kind.
    #[must_use]
    pub const fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Post => Self::Post,
            EntityKind::Image => Self::Image,
            EntityKind::User => Self::User,
        }
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Post => "post.parse_item",
            Self::Image => "image.parse_item",
            Self::User => "user.parse_item",
        };
        f.write_str(name)
    }
}

/// Read-only state handed to every transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Drupal uid -> WordPress user id, loaded for post imports.
    pub authors: Option<&'a AuthorMap>,
}

/// Signature of a transform step.
pub type TransformFn = Box<dyn Fn(EntityRecord, &TransformContext<'_>) -> EntityRecord + Send + Sync>;

/// Ordered transforms per extension point.
#[derive(Default)]
pub struct TransformRegistry {
    hooks: HookRegistry<ExtensionPoint, TransformFn>,
}

impl TransformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` at `point`.
    pub fn register<F>(&mut self, point: ExtensionPoint, name: &str, step: F, priority: i32)
    where
        F: Fn(EntityRecord, &TransformContext<'_>) -> EntityRecord + Send + Sync + 'static,
    {
        self.hooks.register(point, name, Box::new(step), priority);
    }

    /// Removes a registered step by name.
    pub fn unregister(&mut self, point: ExtensionPoint, name: &str) -> usize {
        self.hooks.unregister(&point, name)
    }

    /// Folds every step at `point` over `record`.
    #[must_use]
    pub fn apply(
        &self,
        point: ExtensionPoint,
        record: EntityRecord,
        ctx: &TransformContext<'_>,
    ) -> EntityRecord {
        self.hooks
            .steps(&point)
            .fold(record, |record, (_, step)| step(record, ctx))
    }

    /// Step names at `point`, in execution order.
    #[must_use]
    pub fn names(&self, point: ExtensionPoint) -> Vec<&str> {
        self.hooks.names(&point)
    }
}

/// Registers the built-in transforms for every entity kind.
pub fn register_builtin(registry: &mut TransformRegistry, options: &MigrationOptions) {
    registry.register(
        ExtensionPoint::Post,
        "decode_html_entities",
        builtin::decode_html_entities,
        DEFAULT_PRIORITY,
    );
    registry.register(
        ExtensionPoint::Post,
        "format_post_date",
        builtin::format_post_date,
        DEFAULT_PRIORITY,
    );
    registry.register(
        ExtensionPoint::Post,
        "assign_post_author",
        builtin::assign_post_author,
        DEFAULT_PRIORITY,
    );
    registry.register(
        ExtensionPoint::Post,
        "transform_url_aliases",
        builtin::transform_url_aliases,
        DEFAULT_PRIORITY,
    );
    registry.register(
        ExtensionPoint::Post,
        "assign_post_type",
        builtin::assign_post_type(options.post_type_mapping.clone()),
        DEFAULT_PRIORITY,
    );

    registry.register(
        ExtensionPoint::User,
        "map_drupal_roles_to_wp",
        builtin::map_drupal_roles_to_wp(options.role_mapping.clone()),
        DEFAULT_PRIORITY,
    );
    if options.anonymize_emails {
        registry.register(
            ExtensionPoint::User,
            "anonymize_email",
            builtin::anonymize_email,
            DEFAULT_PRIORITY + 10,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(label: &'static str) -> impl Fn(EntityRecord, &TransformContext<'_>) -> EntityRecord {
        move |mut record, _| {
            let trail = record.field_str("trail").unwrap_or_default().to_string();
            record.set_field("trail", format!("{trail}{label}"));
            record
        }
    }

    #[test]
    fn test_apply_folds_in_priority_order() {
        let mut registry = TransformRegistry::new();
        registry.register(ExtensionPoint::Post, "c", tag("c"), 30);
        registry.register(ExtensionPoint::Post, "a", tag("a"), 1);
        registry.register(ExtensionPoint::Post, "b1", tag("b"), 10);
        registry.register(ExtensionPoint::Post, "b2", tag("B"), 10);

        let out = registry.apply(
            ExtensionPoint::Post,
            EntityRecord::default(),
            &TransformContext::default(),
        );

        assert_eq!(out.field_str("trail"), Some("abBc"));
    }

    #[test]
    fn test_apply_only_touches_its_point() {
        let mut registry = TransformRegistry::new();
        registry.register(ExtensionPoint::User, "u", tag("u"), 10);

        let out = registry.apply(
            ExtensionPoint::Post,
            EntityRecord::default(),
            &TransformContext::default(),
        );

        assert_eq!(out, EntityRecord::default());
    }

    #[test]
    fn test_register_builtin() {
        let mut registry = TransformRegistry::new();
        register_builtin(&mut registry, &MigrationOptions::default());

        assert_eq!(
            registry.names(ExtensionPoint::Post),
            vec![
                "decode_html_entities",
                "format_post_date",
                "assign_post_author",
                "transform_url_aliases",
                "assign_post_type",
            ]
        );
        assert_eq!(registry.names(ExtensionPoint::User), vec!["map_drupal_roles_to_wp"]);
        assert!(registry.names(ExtensionPoint::Image).is_empty());
    }

    #[test]
    fn test_anonymize_emails_is_opt_in() {
        let mut registry = TransformRegistry::new();
        let options = MigrationOptions {
            anonymize_emails: true,
            ..Default::default()
        };
        register_builtin(&mut registry, &options);
        assert_eq!(
            registry.names(ExtensionPoint::User),
            vec!["map_drupal_roles_to_wp", "anonymize_email"]
        );
    }

    #[test]
    fn test_unregister_builtin() {
        let mut registry = TransformRegistry::new();
        register_builtin(&mut registry, &MigrationOptions::default());
        assert_eq!(registry.unregister(ExtensionPoint::Post, "assign_post_type"), 1);
        assert!(!registry
            .names(ExtensionPoint::Post)
            .contains(&"assign_post_type"));
    }
}
