//! Migration job definition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MigrationOptions;
use crate::error::Result;

/// Category of record being migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Drupal nodes -> WordPress posts.
    Post,
    /// Drupal managed files -> WordPress attachments.
    Image,
    /// Drupal users -> WordPress users.
    User,
}

impl EntityKind {
    /// Origin field holding the primary Drupal id of this kind.
    #[must_use]
    pub const fn origin_key(self) -> &'static str {
        match self {
            Self::Post => "drupal_nid",
            Self::Image => "drupal_file_id",
            Self::User => "drupal_user_id",
        }
    }

    /// Human readable plural, used in logs and summaries.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Post => "posts",
            Self::Image => "images",
            Self::User => "users",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Post => "post",
            Self::Image => "image",
            Self::User => "user",
        };
        f.write_str(name)
    }
}

/// Whether a job creates records or repairs existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Write new target records.
    Import,
    /// Read-only scan with conditional repair of existing target records.
    Validate,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Import => "import",
            Self::Validate => "validate",
        })
    }
}

/// Entity-type allow-list parsed from a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityTypeFilter {
    /// No entity-type predicate.
    #[default]
    All,
    /// Exact, case-sensitive allow-list.
    Only(Vec<String>),
}

impl EntityTypeFilter {
    /// Parses `all`, an empty string or a comma-separated list.
    ///
    /// Only the first entry is checked for the `all` sentinel.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let entries: Vec<String> = input.split(',').map(|s| s.trim().to_string()).collect();
        match entries.first().map(String::as_str) {
            None | Some("") | Some("all") => Self::All,
            Some(_) => Self::Only(entries.into_iter().filter(|e| !e.is_empty()).collect()),
        }
    }

    /// The allow-list, or `None` for [`EntityTypeFilter::All`].
    #[must_use]
    pub fn types(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::Only(types) => Some(types),
        }
    }
}

/// Mutable job arguments.
#[derive(Debug, Clone, Default)]
pub struct JobArgs {
    /// Drupal node types to migrate.
    pub entity_type: EntityTypeFilter,
    /// Import-count cap.
    pub limit: Option<u64>,
}

/// One migration run over one entity kind.
#[derive(Debug, Clone)]
pub struct MigrationJob {
    /// Entity kind.
    pub kind: EntityKind,
    /// Run mode.
    pub mode: RunMode,
    /// Rows per page.
    pub page_size: usize,
    /// Offset of the next page.
    pub offset: u64,
    /// Job arguments.
    pub args: JobArgs,
    total: Option<u64>,
}

impl MigrationJob {
    /// Creates a job with an explicit page size.
    #[must_use]
    pub fn new(kind: EntityKind, mode: RunMode, page_size: usize, args: JobArgs) -> Self {
        Self {
            kind,
            mode,
            page_size: page_size.max(1),
            offset: 0,
            args,
            total: None,
        }
    }

    /// Creates a job from configuration options.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured page size is invalid.
    pub fn from_options(kind: EntityKind, mode: RunMode, options: &MigrationOptions) -> Result<Self> {
        let args = JobArgs {
            entity_type: EntityTypeFilter::parse(&options.entity_type),
            limit: options.limit,
        };
        Ok(Self::new(kind, mode, options.resolved_page_size()?, args))
    }

    /// Total computed during counting, if already known.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Caches the count. The import limit caps it. Later calls keep the first value.
    pub fn set_total(&mut self, count: u64) -> u64 {
        *self.total.get_or_insert_with(|| match self.args.limit {
            Some(limit) => count.min(limit),
            None => count,
        })
    }

    /// Number of rows to request for the page at the current offset.
    #[must_use]
    pub fn next_limit(&self) -> usize {
        match self.total {
            Some(total) => {
                let remaining = total.saturating_sub(self.offset);
                remaining.min(self.page_size as u64) as usize
            }
            None => self.page_size,
        }
    }

    /// True once the offset has reached the total.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.total.is_some_and(|total| self.offset >= total)
    }
}
