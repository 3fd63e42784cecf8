//! Built-in transform steps.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::TransformContext;
use crate::parser::{coerce_uint, format_timestamp};
use crate::record::EntityRecord;

/// Role assigned when a Drupal role id has no mapping.
pub const FALLBACK_ROLE: &str = "subscriber";

/// Post type assigned when a Drupal node type has no mapping.
pub const FALLBACK_POST_TYPE: &str = "post";

/// Single-quote entities are left encoded, like PHP's `ENT_COMPAT`.
static SINGLE_QUOTE_ENTITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"&#0*39;|&#[xX]0*27;|&apos;").ok());

const HTML_FIELDS: [&str; 3] = ["post_content", "post_excerpt", "post_title"];

/// Decodes HTML entities in the title, content and excerpt.
pub fn decode_html_entities(mut record: EntityRecord, _ctx: &TransformContext<'_>) -> EntityRecord {
    for name in HTML_FIELDS {
        if let Some(Value::String(text)) = record.fields.get_mut(name) {
            if text.contains('&') {
                *text = decode_compat(text);
            }
        }
    }
    record
}

/// HTML5 entity decoding that keeps single-quote entities verbatim.
#[must_use]
pub fn decode_compat(text: &str) -> String {
    let Some(single_quote) = SINGLE_QUOTE_ENTITY.as_ref() else {
        return text.to_string();
    };
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for kept in single_quote.find_iter(text) {
        out.push_str(&html_escape::decode_html_entities(&text[last..kept.start()]));
        out.push_str(kept.as_str());
        last = kept.end();
    }
    out.push_str(&html_escape::decode_html_entities(&text[last..]));
    out
}

/// Normalizes `post_date`/`post_modified` Unix timestamps into `YYYY-MM-DD HH:MM:SS`.
///
/// Values that are already formatted strings are left alone.
pub fn format_post_date(mut record: EntityRecord, _ctx: &TransformContext<'_>) -> EntityRecord {
    for name in ["post_date", "post_modified"] {
        if let Some(value) = record.fields.get_mut(name) {
            if is_timestamp(value) {
                *value = Value::String(format_timestamp(coerce_uint(value)));
            }
        }
    }
    record
}

fn is_timestamp(value: &Value) -> bool {
    match value {
        Value::Number(_) | Value::Null => true,
        Value::String(s) => s.trim().chars().all(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Sets `post_author` from the Drupal uid, falling back to `0` (no author).
pub fn assign_post_author(mut record: EntityRecord, ctx: &TransformContext<'_>) -> EntityRecord {
    let author = record
        .origin
        .get("drupal_uid")
        .map(coerce_uint)
        .and_then(|uid| ctx.authors.and_then(|authors| authors.get(&uid)))
        .map_or(0, |id| id.0);
    record.set_field("post_author", author);
    record
}

/// Collapses the `url_alias` list into a single `drupal_url_alias` origin field.
///
/// The last alias wins; earlier aliases are dropped.
pub fn transform_url_aliases(mut record: EntityRecord, _ctx: &TransformContext<'_>) -> EntityRecord {
    if let Some(Value::Array(aliases)) = record.fields.remove("url_alias") {
        for alias in aliases {
            let alias = match alias {
                Value::Object(mut row) => row.remove("alias").unwrap_or(Value::Null),
                other => other,
            };
            record.set_origin("drupal_url_alias", alias);
        }
    }
    record
}

/// Maps `drupal_role_id` to a WordPress `role`.
pub fn map_drupal_roles_to_wp(
    mapping: BTreeMap<u64, String>,
) -> impl Fn(EntityRecord, &TransformContext<'_>) -> EntityRecord + Send + Sync + 'static {
    move |mut record, _ctx| {
        let role_id = record.origin.get("drupal_role_id").map_or(0, coerce_uint);
        let role = mapping
            .get(&role_id)
            .map_or(FALLBACK_ROLE, String::as_str)
            .to_string();
        record.set_field("role", role);
        record
    }
}

/// Maps the Drupal node type held in `post_type` to a WordPress post type.
pub fn assign_post_type(
    mapping: BTreeMap<String, String>,
) -> impl Fn(EntityRecord, &TransformContext<'_>) -> EntityRecord + Send + Sync + 'static {
    move |mut record, _ctx| {
        let post_type = record
            .field_str("post_type")
            .and_then(|node_type| mapping.get(node_type))
            .map_or(FALLBACK_POST_TYPE, String::as_str)
            .to_string();
        record.set_field("post_type", post_type);
        record
    }
}

/// Replaces `user_email` with `<sanitized login>@example.local`.
pub fn anonymize_email(mut record: EntityRecord, _ctx: &TransformContext<'_>) -> EntityRecord {
    let login = record.field_str("user_login").unwrap_or_default();
    let email = format!("{}@example.local", slugify(login));
    record.set_field("user_email", email);
    record
}

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to `-`.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
#[path = "builtin_tests.rs"]
mod tests;
