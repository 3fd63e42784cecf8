//! Configuration types for drupal-migrate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Page size used when the caller asks for `-1` ("unbounded").
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Main migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Destination WordPress installation.
    pub target: TargetConfig,
    /// Origin Drupal 7 database. Missing fields fall back to the target's.
    #[serde(default)]
    pub origin: OriginConfig,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// Connection settings for a MySQL database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Database (schema) name.
    pub name: String,
}

/// Destination WordPress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// WordPress database credentials.
    #[serde(flatten)]
    pub database: DatabaseConfig,
    /// Table prefix (`$table_prefix` in `wp-config.php`).
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// Public site URL, used for post GUIDs.
    pub site_url: String,
    /// Filesystem path of `wp-content/uploads`.
    pub uploads_dir: PathBuf,
    /// Public URL of `wp-content/uploads`.
    pub uploads_url: String,
}

/// Origin Drupal configuration. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Server host name.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Database name (defaults to `drupal`).
    pub name: Option<String>,
}

impl OriginConfig {
    /// Resolves the origin connection, defaulting unset fields to the target's credentials.
    #[must_use]
    pub fn resolve(&self, target: &DatabaseConfig) -> DatabaseConfig {
        DatabaseConfig {
            host: self.host.clone().unwrap_or_else(|| target.host.clone()),
            port: self.port.unwrap_or(target.port),
            user: self.user.clone().unwrap_or_else(|| target.user.clone()),
            password: self
                .password
                .clone()
                .unwrap_or_else(|| target.password.clone()),
            name: self.name.clone().unwrap_or_else(default_origin_name),
        }
    }
}

/// Rules for the posts validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorOptions {
    /// The only host whose image references are rewritten.
    pub first_party_host: Option<String>,
    /// Path prefixes stripped from image paths to recover the Drupal file path.
    #[serde(default = "default_origin_base_paths")]
    pub origin_base_paths: Vec<String>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            first_party_host: None,
            origin_base_paths: default_origin_base_paths(),
        }
    }
}

/// Migration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Rows fetched per page; `-1` means [`DEFAULT_PAGE_SIZE`].
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Drupal node types to migrate, comma-separated, or `all`.
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    /// Maximum number of rows to import.
    pub limit: Option<u64>,
    /// Dry run mode (don't write to the target).
    #[serde(default)]
    pub dry_run: bool,
    /// Skip rows whose origin id was already migrated.
    #[serde(default = "default_true")]
    pub skip_migrated: bool,
    /// Directory the Drupal files were copied into.
    pub import_path: Option<PathBuf>,
    /// Replace user e-mails with `<login>@example.local`.
    #[serde(default)]
    pub anonymize_emails: bool,
    /// Drupal role id -> WordPress role name.
    #[serde(default = "default_role_mapping")]
    pub role_mapping: BTreeMap<u64, String>,
    /// Drupal node type -> WordPress post type. Unmapped types become `post`.
    #[serde(default)]
    pub post_type_mapping: BTreeMap<String, String>,
    /// Posts validator rules.
    #[serde(default)]
    pub validator: ValidatorOptions,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            entity_type: default_entity_type(),
            limit: None,
            dry_run: false,
            skip_migrated: true,
            import_path: None,
            anonymize_emails: false,
            role_mapping: default_role_mapping(),
            post_type_mapping: BTreeMap::new(),
            validator: ValidatorOptions::default(),
        }
    }
}

impl MigrationOptions {
    /// Resolves the `-1` sentinel into a concrete page size.
    ///
    /// # Errors
    ///
    /// Returns an error for zero or negative sizes other than `-1`.
    pub fn resolved_page_size(&self) -> Result<usize> {
        match self.page_size {
            -1 => Ok(DEFAULT_PAGE_SIZE),
            n if n > 0 => Ok(n as usize),
            n => Err(Error::Config(format!(
                "page_size must be positive or -1, got {n}"
            ))),
        }
    }
}

fn default_port() -> u16 {
    3306
}

fn default_table_prefix() -> String {
    "wp_".to_string()
}

fn default_origin_name() -> String {
    "drupal".to_string()
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE as i64
}

fn default_entity_type() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

fn default_origin_base_paths() -> Vec<String> {
    vec!["/sites/default/files/".to_string()]
}

/// The stock Drupal 7 roles of the source site.
pub fn default_role_mapping() -> BTreeMap<u64, String> {
    [
        (1, "subscriber"),
        (2, "subscriber"),
        (3, "administrator"),
        (4, "editor"),
        (5, "subscriber"),
        (6, "subscriber"),
        (7, "subscriber"),
        (8, "subscriber"),
        (9, "subscriber"),
    ]
    .into_iter()
    .map(|(id, role)| (id, role.to_string()))
    .collect()
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Origin connection with target fallbacks applied.
    #[must_use]
    pub fn origin_database(&self) -> DatabaseConfig {
        self.origin.resolve(&self.target.database)
    }

    /// Directory attachments are copied from.
    #[must_use]
    pub fn import_path(&self) -> PathBuf {
        self.options
            .import_path
            .clone()
            .unwrap_or_else(|| self.target.uploads_dir.join("import"))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.options.resolved_page_size()?;
        if self.target.database.name.is_empty() {
            return Err(Error::Config(
                "target database name cannot be empty".to_string(),
            ));
        }
        if !self
            .target
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!(
                "table_prefix '{}' may only contain [A-Za-z0-9_]",
                self.target.table_prefix
            )));
        }
        if self.options.limit == Some(0) {
            return Err(Error::Config("limit must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Validate the settings the posts validator needs.
    ///
    /// # Errors
    ///
    /// Returns an error if no first-party host is configured.
    pub fn validate_for_validator(&self) -> Result<()> {
        self.validate()?;
        match self.options.validator.first_party_host.as_deref() {
            Some(host) if !host.is_empty() => Ok(()),
            _ => Err(Error::Config(
                "options.validator.first_party_host is required to validate posts".to_string(),
            )),
        }
    }
}

/// Starting configuration written by `drupal-migrate init`.
pub const CONFIG_TEMPLATE: &str = r#"# drupal-migrate configuration
# Import order: users, images, posts. Then run `validate posts`.

target:
  host: localhost
  port: 3306
  user: wordpress
  password: change-me
  name: wordpress
  table_prefix: wp_
  site_url: https://www.example.com
  uploads_dir: /var/www/html/wp-content/uploads
  uploads_url: https://www.example.com/wp-content/uploads

# Unset fields fall back to the target credentials.
origin:
  name: drupal

options:
  page_size: 100
  entity_type: all
  # limit: 1000
  skip_migrated: true
  # import_path: /var/www/html/wp-content/uploads/import
  anonymize_emails: false
  role_mapping:
    1: subscriber
    2: subscriber
    3: administrator
    4: editor
  post_type_mapping:
    article: post
    page: page
  validator:
    first_party_host: www.example.com
    origin_base_paths:
      - /sites/default/files/
      # Multisite installs also serve files from their own site directory.
      # - /sites/www.example.com/files/
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
target:
  host: localhost
  user: wp
  password: secret
  name: wordpress
  site_url: https://www.example.com
  uploads_dir: /var/www/wp-content/uploads
  uploads_url: https://www.example.com/wp-content/uploads
options:
  page_size: 250
  entity_type: "article, page"
"#
    }

    #[test]
    fn test_config_defaults() {
        let options = MigrationOptions::default();
        assert_eq!(options.page_size, 100);
        assert_eq!(options.entity_type, "all");
        assert!(options.skip_migrated);
        assert!(!options.dry_run);
        assert_eq!(options.role_mapping.get(&3).map(String::as_str), Some("administrator"));
        assert_eq!(options.role_mapping.get(&4).map(String::as_str), Some("editor"));
    }

    #[test]
    fn test_config_yaml_parse() {
        let config: MigrationConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.target.database.port, 3306);
        assert_eq!(config.target.table_prefix, "wp_");
        assert_eq!(config.options.page_size, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_origin_falls_back_to_target_credentials() {
        let config: MigrationConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        let origin = config.origin_database();
        assert_eq!(origin.host, "localhost");
        assert_eq!(origin.user, "wp");
        assert_eq!(origin.password, "secret");
        assert_eq!(origin.name, "drupal");
    }

    #[test]
    fn test_origin_overrides_are_kept() {
        let mut config: MigrationConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.origin.host = Some("legacy-db".into());
        config.origin.name = Some("d7".into());
        let origin = config.origin_database();
        assert_eq!(origin.host, "legacy-db");
        assert_eq!(origin.name, "d7");
        assert_eq!(origin.user, "wp");
    }

    #[test]
    fn test_page_size_sentinel() {
        let mut options = MigrationOptions {
            page_size: -1,
            ..Default::default()
        };
        assert_eq!(options.resolved_page_size().unwrap(), DEFAULT_PAGE_SIZE);
        options.page_size = 0;
        assert!(options.resolved_page_size().is_err());
        options.page_size = -5;
        assert!(options.resolved_page_size().is_err());
    }

    #[test]
    fn test_config_rejects_unsafe_prefix() {
        let mut config: MigrationConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.target.table_prefix = "wp_; DROP TABLE x".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validator_requires_first_party_host() {
        let mut config: MigrationConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert!(config.validate_for_validator().is_err());
        config.options.validator.first_party_host = Some("www.example.com".into());
        assert!(config.validate_for_validator().is_ok());
        assert_eq!(
            config.options.validator.origin_base_paths,
            vec!["/sites/default/files/".to_string()]
        );
    }

    #[test]
    fn test_import_path_defaults_under_uploads() {
        let config: MigrationConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(
            config.import_path(),
            PathBuf::from("/var/www/wp-content/uploads/import")
        );
    }

    #[test]
    fn test_template_parses_and_lists_multisite_base_path() {
        let config: MigrationConfig = serde_yaml::from_str(CONFIG_TEMPLATE).unwrap();
        assert!(config.validate_for_validator().is_ok());
        assert_eq!(
            config.options.validator.origin_base_paths,
            vec!["/sites/default/files/".to_string()]
        );
        assert!(CONFIG_TEMPLATE.contains("# - /sites/www.example.com/files/"));
    }

    #[test]
    fn test_config_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_yaml().as_bytes()).unwrap();
        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.target.database.name, "wordpress");
    }
}
