//! Per-kind normalization of raw origin rows.
//!
//! Runs once per row, before the generic transforms. An empty row yields
//! `None`, which the runner counts as skipped.

use chrono::DateTime;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use crate::job::EntityKind;
use crate::record::{EntityRecord, RawRow};

/// Target datetime format.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// URI scheme Drupal uses for public files.
pub const PUBLIC_SCHEME: &str = "public://";

/// Length of the generated user password.
pub const GENERATED_PASSWORD_LEN: usize = 12;

/// Unsigned integer coercion. Negative, fractional-negative and non-numeric input becomes `0`.
#[must_use]
pub fn coerce_uint(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f > 0.0).map(|f| f as u64))
                .unwrap_or(0)
        }
        Value::Bool(b) => u64::from(*b),
        _ => 0,
    }
}

/// String coercion. `null` becomes the empty string.
#[must_use]
pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(true)) => "1".to_string(),
        Some(Value::Bool(false)) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Formats a Unix timestamp (UTC) as `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn format_timestamp(secs: u64) -> String {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    DateTime::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format(DATETIME_FORMAT)
        .to_string()
}

fn uint_fields(row: &mut RawRow, names: &[&str]) {
    for name in names {
        if let Some(value) = row.get_mut(*name) {
            *value = Value::from(coerce_uint(value));
        }
    }
}

fn string_fields(row: &mut RawRow, names: &[&str]) {
    for name in names {
        let text = coerce_string(row.get(*name));
        row.insert((*name).to_string(), Value::String(text));
    }
}

fn date_fields(row: &mut RawRow, names: &[&str]) {
    for name in names {
        if let Some(value) = row.get_mut(*name) {
            if !value.is_string() || value.as_str().is_some_and(|s| s.trim().parse::<u64>().is_ok()) {
                *value = Value::String(format_timestamp(coerce_uint(value)));
            }
        }
    }
}

/// Normalizes a raw row of the given kind.
#[must_use]
pub fn parse_item(kind: EntityKind, row: RawRow) -> Option<EntityRecord> {
    match kind {
        EntityKind::Post => parse_post(row),
        EntityKind::Image => parse_image(row),
        EntityKind::User => parse_user(row),
    }
}

/// Drupal node + body row.
#[must_use]
pub fn parse_post(mut row: RawRow) -> Option<EntityRecord> {
    if row.is_empty() {
        return None;
    }

    string_fields(&mut row, &["post_content", "post_excerpt", "post_title"]);
    uint_fields(&mut row, &["drupal_nid", "drupal_uid", "drupal_sticky"]);
    date_fields(&mut row, &["post_date", "post_modified"]);

    if !row.get("url_alias").is_some_and(Value::is_array) {
        row.insert("url_alias".to_string(), Value::Array(Vec::new()));
    }
    row.entry("comment_status".to_string())
        .or_insert_with(|| Value::from("closed"));
    row.insert("post_status".to_string(), Value::from("publish"));

    Some(EntityRecord::from_raw(row))
}

/// Drupal `file_managed` row.
#[must_use]
pub fn parse_image(mut row: RawRow) -> Option<EntityRecord> {
    if row.is_empty() {
        return None;
    }

    let path = coerce_string(row.get("drupal_file_path"));
    let path = path.strip_prefix(PUBLIC_SCHEME).unwrap_or(&path).to_string();
    row.insert("drupal_file_path".to_string(), Value::from(path.clone()));
    row.insert("attached_file".to_string(), Value::from(path));

    string_fields(&mut row, &["post_title", "post_mime_type"]);
    uint_fields(&mut row, &["drupal_file_id", "drupal_user_id"]);
    date_fields(&mut row, &["post_date"]);
    if let Some(date) = row.get("post_date").cloned() {
        row.insert("post_modified".to_string(), date);
    }
    row.insert("post_status".to_string(), Value::from("inherit"));

    Some(EntityRecord::from_raw(row))
}

/// Drupal `users` (+ `users_roles`) row.
#[must_use]
pub fn parse_user(mut row: RawRow) -> Option<EntityRecord> {
    if row.is_empty() {
        return None;
    }

    string_fields(&mut row, &["user_login", "user_email"]);
    uint_fields(
        &mut row,
        &["drupal_user_id", "drupal_user_status", "drupal_role_id"],
    );
    date_fields(&mut row, &["user_registered"]);
    row.insert("user_pass".to_string(), Value::from(generate_password()));

    Some(EntityRecord::from_raw(row))
}

/// Random alphanumeric password. Users are expected to reset it.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_coerce_uint() {
        assert_eq!(coerce_uint(&json!(12)), 12);
        assert_eq!(coerce_uint(&json!(-3)), 0);
        assert_eq!(coerce_uint(&json!("42")), 42);
        assert_eq!(coerce_uint(&json!(" 7 ")), 7);
        assert_eq!(coerce_uint(&json!("abc")), 0);
        assert_eq!(coerce_uint(&json!("-9")), 0);
        assert_eq!(coerce_uint(&json!(3.9)), 3);
        assert_eq!(coerce_uint(&json!(null)), 0);
    }

    #[test]
    fn test_empty_row_is_skipped() {
        assert!(parse_item(EntityKind::Post, RawRow::new()).is_none());
        assert!(parse_item(EntityKind::Image, RawRow::new()).is_none());
        assert!(parse_item(EntityKind::User, RawRow::new()).is_none());
    }

    #[test]
    fn test_post_null_content_becomes_empty_string() {
        let record = parse_post(row(&[
            ("drupal_nid", json!("10")),
            ("drupal_uid", json!(2)),
            ("post_title", json!("Title")),
            ("post_content", Value::Null),
            ("post_excerpt", Value::Null),
            ("post_date", json!(0)),
            ("post_modified", json!(86_400)),
        ]))
        .unwrap();

        assert_eq!(record.field_str("post_content"), Some(""));
        assert_eq!(record.field_str("post_excerpt"), Some(""));
        assert_eq!(record.origin_id("drupal_nid"), Some(10));
        assert_eq!(record.field_str("post_date"), Some("1970-01-01 00:00:00"));
        assert_eq!(record.field_str("post_modified"), Some("1970-01-02 00:00:00"));
        assert_eq!(record.field_str("post_status"), Some("publish"));
        assert_eq!(record.field_str("comment_status"), Some("closed"));
        assert_eq!(record.fields.get("url_alias"), Some(&json!([])));
    }

    #[test]
    fn test_post_origin_fields_are_split_out() {
        let record = parse_post(row(&[
            ("drupal_nid", json!(1)),
            ("drupal_sticky", json!(1)),
            ("post_title", json!("t")),
        ]))
        .unwrap();
        assert!(record.origin.contains_key("drupal_sticky"));
        assert!(!record.fields.contains_key("drupal_nid"));
    }

    #[test]
    fn test_image_strips_public_scheme() {
        let record = parse_image(row(&[
            ("drupal_file_id", json!(5)),
            ("drupal_user_id", json!(1)),
            ("drupal_file_path", json!("public://2019/05/a.jpg")),
            ("post_title", json!("a.jpg")),
            ("post_date", json!(1_262_304_000)),
            ("post_mime_type", json!("image/jpeg")),
        ]))
        .unwrap();

        assert_eq!(record.origin.get("drupal_file_path"), Some(&json!("2019/05/a.jpg")));
        assert_eq!(record.field_str("attached_file"), Some("2019/05/a.jpg"));
        assert_eq!(record.field_str("post_date"), Some("2010-01-01 00:00:00"));
        assert_eq!(record.field_str("post_modified"), Some("2010-01-01 00:00:00"));
        assert_eq!(record.field_str("post_status"), Some("inherit"));
    }

    #[test]
    fn test_user_gets_password_and_registration_date() {
        let record = parse_user(row(&[
            ("drupal_user_id", json!(9)),
            ("user_login", json!("jane")),
            ("user_email", Value::Null),
            ("user_registered", json!(1_262_304_000)),
            ("drupal_user_status", json!(1)),
            ("drupal_role_id", Value::Null),
        ]))
        .unwrap();

        let pass = record.field_str("user_pass").unwrap();
        assert_eq!(pass.len(), GENERATED_PASSWORD_LEN);
        assert!(pass.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(record.field_str("user_email"), Some(""));
        assert_eq!(record.field_str("user_registered"), Some("2010-01-01 00:00:00"));
        assert_eq!(record.origin_id("drupal_role_id"), Some(0));
    }

    #[test]
    fn test_format_timestamp_out_of_range() {
        assert_eq!(format_timestamp(u64::MAX), "1970-01-01 00:00:00");
    }
}
