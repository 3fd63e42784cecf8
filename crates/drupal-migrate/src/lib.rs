// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Drupal 7 to WordPress Migration Tool
//!
//! `drupal-migrate` is a CLI tool and library for moving content out of a
//! Drupal 7 database into a WordPress installation.
//!
//! ## Supported Entities
//!
//! | Entity | Drupal origin | WordPress target |
//! |--------|---------------|------------------|
//! | Posts | `node` + `field_data_body` + `url_alias` | `posts` + `postmeta` |
//! | Images | `file_managed` | `attachment` posts + uploads directory |
//! | Users | `users` + `users_roles` | `users` + `usermeta` |
//!
//! Import users first: post authors are resolved through the `_drupal_user_id`
//! metadata of already-migrated users.
//!
//! ## Quick Start
//!
//! ```bash
//! drupal-migrate init --output migration.yaml
//! drupal-migrate --config migration.yaml import users
//! drupal-migrate --config migration.yaml import images
//! drupal-migrate --config migration.yaml import posts --entity-type article,page
//! drupal-migrate --config migration.yaml validate posts
//!
//! # Dry run (preview only)
//! drupal-migrate --config migration.yaml --dry-run import posts
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! target:
//!   host: localhost
//!   user: wordpress
//!   password: secret
//!   name: wordpress
//!   site_url: https://www.example.com
//!   uploads_dir: /var/www/html/wp-content/uploads
//!   uploads_url: https://www.example.com/wp-content/uploads
//!
//! origin:
//!   name: drupal
//!
//! options:
//!   page_size: 100
//!   entity_type: all
//!   validator:
//!     first_party_host: www.example.com
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod connectors;
pub mod error;
pub mod job;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod registry;
pub mod retry;
pub mod sink;
pub mod store;
pub mod transform;
pub mod validator;

pub use config::{MigrationConfig, MigrationOptions};
pub use connectors::{create_source, RowSource, SourceContext};
pub use error::{Error, Result};
pub use job::{EntityKind, MigrationJob, RunMode};
pub use pipeline::{MigrationStats, Pipeline, EXIT_CANCELLED, EXIT_NO_ROWS};
pub use record::{EntityRecord, RawRow, TargetId};
pub use store::TargetStore;
pub use transform::{register_builtin, TransformRegistry};
