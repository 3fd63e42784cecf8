//! Tests for the built-in transforms.

use super::*;
use crate::record::TargetId;
use crate::transform::AuthorMap;
use proptest::prelude::*;
use serde_json::json;

fn post(title: &str, content: &str, excerpt: &str) -> EntityRecord {
    let mut record = EntityRecord::default();
    record.set_field("post_title", title);
    record.set_field("post_content", content);
    record.set_field("post_excerpt", excerpt);
    record
}

#[test]
fn test_decode_html_entities_in_all_three_fields() {
    let record = post("Fish &amp; Chips", "&lt;p&gt;Caf&eacute;&lt;/p&gt;", "&quot;quoted&quot;");

    let out = decode_html_entities(record, &TransformContext::default());

    assert_eq!(out.field_str("post_title"), Some("Fish & Chips"));
    assert_eq!(out.field_str("post_content"), Some("<p>Café</p>"));
    assert_eq!(out.field_str("post_excerpt"), Some("\"quoted\""));
}

#[test]
fn test_decode_keeps_single_quote_entities() {
    assert_eq!(decode_compat("it&#039;s &amp; that&apos;s"), "it&#039;s & that&apos;s");
}

#[test]
fn test_decode_keeps_every_numeric_single_quote_form() {
    let text = "&#039;x&#0039;&#X27;&#x0027;&#39;";
    assert_eq!(decode_compat(text), text);
    assert_eq!(decode_compat("&#0039;&amp;&#x22;"), "&#0039;&\"");
}

#[test]
fn test_decode_does_not_add_missing_fields() {
    let out = decode_html_entities(EntityRecord::default(), &TransformContext::default());
    assert!(out.fields.is_empty());
}

proptest! {
    #[test]
    fn prop_decode_is_idempotent(parts in prop::collection::vec(
        prop::sample::select(vec!["a", " ", "<p>", "é", "&lt;", "&eacute;", "&quot;", "&#169;", "&hellip;", "&#039;"]),
        0..24,
    )) {
        let text = parts.concat();
        let once = decode_html_entities(post(&text, &text, &text), &TransformContext::default());
        let twice = decode_html_entities(once.clone(), &TransformContext::default());
        prop_assert_eq!(once, twice);
    }
}

#[test]
fn test_format_post_date_from_timestamps() {
    let mut record = EntityRecord::default();
    record.set_field("post_date", 1_262_304_000);
    record.set_field("post_modified", "1262390400");

    let out = format_post_date(record, &TransformContext::default());

    assert_eq!(out.field_str("post_date"), Some("2010-01-01 00:00:00"));
    assert_eq!(out.field_str("post_modified"), Some("2010-01-02 00:00:00"));
}

#[test]
fn test_format_post_date_is_idempotent_on_formatted_dates() {
    let mut record = EntityRecord::default();
    record.set_field("post_date", "2010-01-01 00:00:00");

    let out = format_post_date(record.clone(), &TransformContext::default());

    assert_eq!(out, record);
}

#[test]
fn test_assign_post_author_maps_known_uid() {
    let authors: AuthorMap = [(5, TargetId(42))].into_iter().collect();
    let ctx = TransformContext {
        authors: Some(&authors),
    };
    let mut record = EntityRecord::default();
    record.set_origin("drupal_uid", 5);

    let out = assign_post_author(record, &ctx);

    assert_eq!(out.fields.get("post_author"), Some(&json!(42)));
}

#[test]
fn test_assign_post_author_falls_back_to_zero() {
    let authors: AuthorMap = [(5, TargetId(42))].into_iter().collect();
    let ctx = TransformContext {
        authors: Some(&authors),
    };
    let mut record = EntityRecord::default();
    record.set_origin("drupal_uid", 6);

    let out = assign_post_author(record.clone(), &ctx);
    assert_eq!(out.fields.get("post_author"), Some(&json!(0)));

    let out = assign_post_author(record, &TransformContext::default());
    assert_eq!(out.fields.get("post_author"), Some(&json!(0)));
}

#[test]
fn test_transform_url_aliases_last_wins() {
    let mut record = EntityRecord::default();
    record.set_field("url_alias", json!(["a", "b", "c"]));

    let out = transform_url_aliases(record, &TransformContext::default());

    assert_eq!(out.origin.get("drupal_url_alias"), Some(&json!("c")));
    assert!(!out.fields.contains_key("url_alias"));
}

#[test]
fn test_transform_url_aliases_accepts_alias_rows() {
    let mut record = EntityRecord::default();
    record.set_field("url_alias", json!([{"alias": "news/one"}, {"alias": "news/two"}]));

    let out = transform_url_aliases(record, &TransformContext::default());

    assert_eq!(out.origin.get("drupal_url_alias"), Some(&json!("news/two")));
}

#[test]
fn test_transform_url_aliases_without_aliases() {
    let mut record = EntityRecord::default();
    record.set_field("url_alias", json!([]));

    let out = transform_url_aliases(record, &TransformContext::default());

    assert!(!out.origin.contains_key("drupal_url_alias"));
}

#[test]
fn test_map_roles_known_and_unknown() {
    let step = map_drupal_roles_to_wp([(3, "administrator".to_string())].into_iter().collect());

    let mut admin = EntityRecord::default();
    admin.set_origin("drupal_role_id", 3);
    let out = step(admin, &TransformContext::default());
    assert_eq!(out.field_str("role"), Some("administrator"));

    let mut unknown = EntityRecord::default();
    unknown.set_origin("drupal_role_id", 999);
    let out = step(unknown, &TransformContext::default());
    assert_eq!(out.field_str("role"), Some("subscriber"));
}

#[test]
fn test_map_roles_without_role_row() {
    let step = map_drupal_roles_to_wp(crate::config::default_role_mapping());
    let mut user = EntityRecord::default();
    user.set_origin("drupal_role_id", serde_json::Value::Null);

    let out = step(user, &TransformContext::default());

    assert_eq!(out.field_str("role"), Some("subscriber"));
}

#[test]
fn test_assign_post_type() {
    let step = assign_post_type([("page".to_string(), "page".to_string())].into_iter().collect());

    let mut page = EntityRecord::default();
    page.set_field("post_type", "page");
    assert_eq!(step(page, &TransformContext::default()).field_str("post_type"), Some("page"));

    let mut article = EntityRecord::default();
    article.set_field("post_type", "article");
    assert_eq!(
        step(article, &TransformContext::default()).field_str("post_type"),
        Some("post")
    );
}

#[test]
fn test_anonymize_email() {
    let mut user = EntityRecord::default();
    user.set_field("user_login", "Jane Doe");
    user.set_field("user_email", "jane@corp.example");

    let out = anonymize_email(user, &TransformContext::default());

    assert_eq!(out.field_str("user_email"), Some("jane-doe@example.local"));
}

#[test]
fn test_slugify() {
    assert_eq!(slugify("Hello, World!"), "hello-world");
    assert_eq!(slugify("  --Already-slugged--  "), "already-slugged");
    assert_eq!(slugify("Café 2010"), "caf-2010");
    assert_eq!(slugify(""), "");
}
