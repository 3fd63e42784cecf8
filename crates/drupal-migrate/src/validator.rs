//! Posts validator: rewrites embedded Drupal image URLs to migrated attachments.
//!
//! For each scanned post, `src` attributes pointing at the first-party host
//! (or host-less paths) are turned back into Drupal file paths, looked up via
//! the `_drupal_file_path` metadata of migrated images and replaced with the
//! attachment URL. A post is only written when at least one reference was
//! replaced.

use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use crate::config::ValidatorOptions;
use crate::error::{Error, Result};
use crate::job::EntityKind;
use crate::parser::{coerce_string, coerce_uint};
use crate::record::{EntityRecord, RawRow, TargetId};
use crate::sink::RecordSink;

/// Meta key holding the Drupal path of a migrated image.
pub const FILE_PATH_META_KEY: &str = "_drupal_file_path";

const SRC_PATTERN: &str = r#"(?i)src=(?:"([^"']+)"|'([^"']+)')"#;

/// Which references are considered and how paths map back to Drupal.
#[derive(Debug, Clone)]
pub struct ValidatorRules {
    host: String,
    base: Url,
    origin_base_paths: Vec<String>,
    src: Regex,
}

impl ValidatorRules {
    /// Builds rules for `first_party_host`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host does not form a valid URL.
    pub fn new(first_party_host: &str, origin_base_paths: Vec<String>) -> Result<Self> {
        let host = first_party_host.trim().to_ascii_lowercase();
        let base = Url::parse(&format!("https://{host}/"))
            .map_err(|e| Error::Config(format!("invalid first_party_host '{host}': {e}")))?;
        let src = Regex::new(SRC_PATTERN).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            host,
            base,
            origin_base_paths,
            src,
        })
    }

    /// Builds rules from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no first-party host is configured.
    pub fn from_options(options: &ValidatorOptions) -> Result<Self> {
        let host = options
            .first_party_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| Error::Config("validator.first_party_host is required".into()))?;
        Self::new(host, options.origin_base_paths.clone())
    }

    /// Drupal file path for a URL path: `urldecode`, then the first matching base path stripped.
    #[must_use]
    pub fn origin_file_path(&self, url_path: &str) -> String {
        let decoded = percent_decode_str(&url_path.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned();
        self.origin_base_paths
            .iter()
            .find_map(|prefix| decoded.strip_prefix(prefix.as_str()))
            .map_or_else(|| decoded.clone(), str::to_string)
    }

    /// Replaces `src` attribute values found in `urls`, leaving every other attribute as written.
    #[must_use]
    pub fn rewrite_sources(&self, content: &str, urls: &HashMap<String, String>) -> String {
        self.src
            .replace_all(content, |caps: &Captures<'_>| {
                let whole = &caps[0];
                let Some(value) = caps.get(1).or_else(|| caps.get(2)) else {
                    return whole.to_string();
                };
                let Some(url) = urls.get(value.as_str()) else {
                    return whole.to_string();
                };
                let start = value.start() - caps.get(0).map_or(0, |m| m.start());
                format!("{}{}{}", &whole[..start], url, &whole[start + value.len()..])
            })
            .into_owned()
    }
}

/// An image reference found in post content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// The attribute value exactly as it appears in the content.
    pub src: String,
    /// URL path of the reference.
    pub path: String,
}

/// First-party image references in `content`, deduplicated in first-seen order.
///
/// `data:` URIs and references to other hosts are skipped.
#[must_use]
pub fn extract_images(content: &str, rules: &ValidatorRules) -> Vec<EmbeddedImage> {
    let mut images: Vec<EmbeddedImage> = Vec::new();
    for captures in rules.src.captures_iter(content) {
        let Some(src) = captures.get(1).or_else(|| captures.get(2)).map(|m| m.as_str()) else {
            continue;
        };
        if images.iter().any(|image| image.src == src) {
            continue;
        }
        if src.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:")) {
            continue;
        }
        let Ok(url) = rules.base.join(src) else {
            continue;
        };
        if url.host_str() != Some(rules.host.as_str()) {
            continue;
        }
        images.push(EmbeddedImage {
            src: src.to_string(),
            path: url.path().to_string(),
        });
    }
    images
}

/// Scanned post row (`ID`, `post_content`) as a record bound to its target id.
#[must_use]
pub fn parse_row(row: RawRow) -> Option<EntityRecord> {
    let id = row.get("ID").map(coerce_uint).filter(|id| *id > 0)?;
    let mut record = EntityRecord {
        target_id: Some(TargetId(id)),
        ..EntityRecord::default()
    };
    record.set_field("post_content", coerce_string(row.get("post_content")));
    Some(record)
}

/// What validating one post did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// No reference could be resolved; the post was not written.
    Unchanged,
    /// The post was rewritten.
    Updated {
        /// Post id.
        id: TargetId,
        /// Number of distinct references replaced.
        replaced: usize,
    },
}

/// Read, compare and conditionally repair one post at a time.
pub struct PostsValidator {
    rules: ValidatorRules,
    sink: RecordSink,
}

impl PostsValidator {
    /// Creates a validator writing through `sink`.
    #[must_use]
    pub fn new(rules: ValidatorRules, sink: RecordSink) -> Self {
        Self { rules, sink }
    }

    /// Rewrites the resolvable image references of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkWrite`] if a lookup or the update fails.
    pub async fn process(&self, mut record: EntityRecord) -> Result<ValidationOutcome> {
        let content = record.field_str("post_content").unwrap_or_default().to_string();
        let store = self.sink.store();
        let mut resolved: HashMap<String, String> = HashMap::new();

        for image in extract_images(&content, &self.rules) {
            let path = self.rules.origin_file_path(&image.path);
            let Some(attachment) = store.find_by_meta(EntityKind::Image, FILE_PATH_META_KEY, &path).await? else {
                debug!("No migrated image for {}", path);
                continue;
            };
            let Some(url) = store.attachment_url(attachment).await? else {
                continue;
            };
            resolved.insert(image.src, url);
        }

        if resolved.is_empty() {
            return Ok(ValidationOutcome::Unchanged);
        }
        let replaced = resolved.len();
        let content = self.rules.rewrite_sources(&content, &resolved);
        record.fields.insert("post_content".into(), Value::from(content));
        let id = self.sink.update(EntityKind::Post, &record).await?.id();
        debug!("Rewrote {} image references in post {}", replaced, id);
        Ok(ValidationOutcome::Updated { id, replaced })
    }
}
