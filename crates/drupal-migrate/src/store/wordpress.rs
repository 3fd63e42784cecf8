//! WordPress target store over MySQL.
//!
//! Writes go straight to the core tables. Table names are built from the
//! configured prefix, which `MigrationConfig::validate` restricts to
//! `[A-Za-z0-9_]`; every value is bound.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::{check_insertable, StoreState, TargetStore};
use crate::config::MigrationConfig;
use crate::connectors::mysql::{bind_all, connect};
use crate::connectors::query::Bind;
use crate::error::{Error, Result};
use crate::job::EntityKind;
use crate::parser::DATETIME_FORMAT;
use crate::record::{meta_string, Fields, TargetId};
use crate::retry::RetryConfig;
use crate::transform::builtin::slugify;

/// Meta key holding an attachment's path relative to the uploads directory.
pub const ATTACHED_FILE_META_KEY: &str = "_wp_attached_file";

const POST_UPDATE_COLUMNS: &[&str] = &[
    "post_author",
    "post_content",
    "post_excerpt",
    "post_title",
    "post_status",
    "post_type",
    "comment_status",
];

const USER_UPDATE_COLUMNS: &[&str] = &["user_email", "user_url", "display_name", "user_nicename"];

const MAX_NICENAME_LEN: usize = 50;

type CacheKey = (bool, String, String);

/// [`TargetStore`] writing to a WordPress database.
pub struct WordPressStore {
    pool: MySqlPool,
    prefix: String,
    site_url: String,
    uploads_dir: PathBuf,
    uploads_url: String,
    import_path: PathBuf,
    state: StoreState,
    meta_cache: Mutex<HashMap<CacheKey, TargetId>>,
}

/// Serialized capabilities array for a single role, as WordPress stores it.
#[must_use]
pub fn capabilities_value(role: &str) -> String {
    format!("a:1:{{s:{}:\"{}\";b:1;}}", role.len(), role)
}

/// Legacy user level matching a role.
#[must_use]
pub fn user_level(role: &str) -> u8 {
    match role {
        "administrator" => 10,
        "editor" => 7,
        "author" => 2,
        "contributor" => 1,
        _ => 0,
    }
}

/// Resolves `file` below `root`, rejecting absolute paths and `..` components.
pub(crate) fn contained_path(root: &Path, file: &str) -> std::result::Result<PathBuf, String> {
    let relative = Path::new(file);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(format!("refusing file path outside the import directory: {file}"));
    }
    Ok(root.join(relative))
}

/// First slug of `base`, `base-2`, `base-3`, ... not in `taken`.
pub(crate) fn unique_slug(base: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn value_bind(value: Option<&Value>) -> Bind {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Bind::UInt)
            .or_else(|| n.as_i64().map(Bind::Int))
            .unwrap_or_else(|| Bind::Text(n.to_string())),
        Some(other) => Bind::Text(meta_string(other)),
        None => Bind::Text(String::new()),
    }
}

fn text(fields: &Fields, name: &str) -> String {
    fields.get(name).map(meta_string).unwrap_or_default()
}

fn text_or(fields: &Fields, name: &str, default: &str) -> String {
    let value = text(fields, name);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

impl WordPressStore {
    /// Opens the target database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(config: &MigrationConfig, retry: &RetryConfig) -> Result<Self> {
        let pool = connect(&config.target.database, retry).await?;
        Ok(Self::new(pool, config))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: MySqlPool, config: &MigrationConfig) -> Self {
        Self {
            pool,
            prefix: config.target.table_prefix.clone(),
            site_url: config.target.site_url.trim_end_matches('/').to_string(),
            uploads_dir: config.target.uploads_dir.clone(),
            uploads_url: config.target.uploads_url.trim_end_matches('/').to_string(),
            import_path: config.import_path(),
            state: StoreState::default(),
            meta_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<CacheKey, TargetId>> {
        self.meta_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now() -> String {
        Utc::now().format(DATETIME_FORMAT).to_string()
    }

    async fn taken_slugs(&self, base: &str) -> Result<BTreeSet<String>> {
        let sql = format!(
            "SELECT post_name FROM {} WHERE post_name = ? OR post_name LIKE ?",
            self.table("posts")
        );
        let rows = sqlx::query(&sql)
            .bind(base)
            .bind(format!("{base}-%"))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Error::write_failed))
            .collect()
    }

    async fn insert_post(&self, fields: &Fields, post_type: &str, guid: Option<String>) -> Result<TargetId> {
        let title = text(fields, "post_title");
        let base = match slugify(&title) {
            slug if slug.is_empty() => post_type.to_string(),
            slug => slug,
        };
        let post_name = unique_slug(&base, &self.taken_slugs(&base).await?);
        let now = Self::now();
        let post_date = text_or(fields, "post_date", &now);
        let post_modified = text_or(fields, "post_modified", &post_date);

        let sql = format!(
            "INSERT INTO {} (post_author, post_date, post_date_gmt, post_content, post_title, \
             post_excerpt, post_status, comment_status, ping_status, post_name, to_ping, pinged, \
             post_modified, post_modified_gmt, post_content_filtered, post_parent, guid, \
             menu_order, post_type, post_mime_type, comment_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'closed', ?, '', '', ?, ?, '', 0, ?, 0, ?, ?, 0)",
            self.table("posts")
        );
        let binds = vec![
            value_bind(fields.get("post_author").or(Some(&Value::from(0)))),
            Bind::Text(post_date.clone()),
            Bind::Text(post_date),
            Bind::Text(text(fields, "post_content")),
            Bind::Text(title),
            Bind::Text(text(fields, "post_excerpt")),
            Bind::Text(text_or(fields, "post_status", "publish")),
            Bind::Text(text_or(fields, "comment_status", "closed")),
            Bind::Text(post_name),
            Bind::Text(post_modified.clone()),
            Bind::Text(post_modified),
            Bind::Text(guid.clone().unwrap_or_default()),
            Bind::Text(post_type.to_string()),
            Bind::Text(text(fields, "post_mime_type")),
        ];
        let result = bind_all(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        let id = TargetId(result.last_insert_id());

        if guid.is_none() {
            let sql = format!("UPDATE {} SET guid = ? WHERE ID = ?", self.table("posts"));
            sqlx::query(&sql)
                .bind(format!("{}/?p={}", self.site_url, id))
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(Error::write_failed)?;
        }
        Ok(id)
    }

    async fn copy_attachment(&self, file: &str) -> Result<()> {
        let src = contained_path(&self.import_path, file).map_err(Error::SinkWrite)?;
        let dst = contained_path(&self.uploads_dir, file).map_err(Error::SinkWrite)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::SinkWrite(format!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| Error::SinkWrite(format!("cannot copy {}: {e}", src.display())))?;
        debug!("Copied {} -> {}", src.display(), dst.display());
        Ok(())
    }

    async fn insert_attachment(&self, fields: &Fields, file: &str) -> Result<TargetId> {
        let guid = format!("{}/{}", self.uploads_url, file);
        let mut fields = fields.clone();
        fields.insert("post_status".into(), Value::from("inherit"));
        let id = self.insert_post(&fields, "attachment", Some(guid)).await?;
        self.add_meta(EntityKind::Image, id, ATTACHED_FILE_META_KEY, &Value::from(file))
            .await?;
        Ok(id)
    }

    /// Removes an upload copied for an attachment whose row was never written.
    async fn discard_attachment(&self, file: &str) {
        let Ok(dst) = contained_path(&self.uploads_dir, file) else {
            return;
        };
        match tokio::fs::remove_file(&dst).await {
            Ok(()) => debug!("Removed orphaned upload {}", dst.display()),
            Err(e) => warn!("Could not remove orphaned upload {}: {}", dst.display(), e),
        }
    }

    async fn insert_user(&self, fields: &Fields) -> Result<TargetId> {
        let login = text(fields, "user_login");
        let email = text(fields, "user_email");
        let users = self.table("users");

        let sql = format!("SELECT ID FROM {users} WHERE user_login = ? LIMIT 1");
        if sqlx::query(&sql)
            .bind(&login)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::write_failed)?
            .is_some()
        {
            return Err(Error::SinkWrite("Sorry, that username already exists!".into()));
        }
        if !email.is_empty() {
            let sql = format!("SELECT ID FROM {users} WHERE user_email = ? LIMIT 1");
            if sqlx::query(&sql)
                .bind(&email)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::write_failed)?
                .is_some()
            {
                return Err(Error::SinkWrite("Sorry, that email address is already used!".into()));
            }
        }

        let nicename: String = slugify(&login).chars().take(MAX_NICENAME_LEN).collect();
        let sql = format!(
            "INSERT INTO {users} (user_login, user_pass, user_nicename, user_email, user_url, \
             user_registered, user_activation_key, user_status, display_name) \
             VALUES (?, ?, ?, ?, '', ?, '', 0, ?)"
        );
        let result = sqlx::query(&sql)
            .bind(&login)
            .bind(text(fields, "user_pass"))
            .bind(nicename)
            .bind(&email)
            .bind(text_or(fields, "user_registered", &Self::now()))
            .bind(&login)
            .execute(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        let id = TargetId(result.last_insert_id());

        let role = text_or(fields, "role", crate::transform::builtin::FALLBACK_ROLE);
        let capabilities_key = format!("{}capabilities", self.prefix);
        let level_key = format!("{}user_level", self.prefix);
        self.add_meta(EntityKind::User, id, &capabilities_key, &Value::from(capabilities_value(&role)))
            .await?;
        self.add_meta(EntityKind::User, id, &level_key, &Value::from(user_level(&role)))
            .await?;
        self.add_meta(EntityKind::User, id, "nickname", &Value::from(login))
            .await?;
        Ok(id)
    }

    async fn after_post_write(&self, id: TargetId) -> Result<()> {
        let deferred = self.state.snapshot();
        if !deferred.comment_counting {
            let sql = format!(
                "UPDATE {} SET comment_count = (SELECT COUNT(*) FROM {} WHERE comment_post_ID = ? \
                 AND comment_approved = '1') WHERE ID = ?",
                self.table("posts"),
                self.table("comments")
            );
            sqlx::query(&sql)
                .bind(id.0)
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(Error::write_failed)?;
        }
        if !deferred.term_counting {
            let sql = format!(
                "UPDATE {tt} SET count = (SELECT COUNT(*) FROM {tr} WHERE {tr}.term_taxonomy_id = \
                 {tt}.term_taxonomy_id) WHERE term_taxonomy_id IN (SELECT term_taxonomy_id FROM {tr} \
                 WHERE object_id = ?)",
                tt = self.table("term_taxonomy"),
                tr = self.table("term_relationships")
            );
            sqlx::query(&sql)
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(Error::write_failed)?;
        }
        self.after_write();
        Ok(())
    }

    fn after_write(&self) {
        if !self.state.snapshot().cache_invalidation {
            self.cache().clear();
        }
    }

    fn meta_table(kind: EntityKind) -> (&'static str, &'static str, &'static str) {
        match kind {
            EntityKind::Post | EntityKind::Image => ("postmeta", "post_id", "meta_id"),
            EntityKind::User => ("usermeta", "user_id", "umeta_id"),
        }
    }
}

#[async_trait]
impl TargetStore for WordPressStore {
    async fn create(&self, kind: EntityKind, fields: &Fields) -> Result<TargetId> {
        check_insertable(kind, fields).map_err(Error::SinkWrite)?;
        match kind {
            EntityKind::Post => {
                let post_type = text_or(fields, "post_type", "post");
                let id = self.insert_post(fields, &post_type, None).await?;
                self.after_post_write(id).await?;
                Ok(id)
            }
            EntityKind::Image => {
                let file = text(fields, "attached_file");
                self.copy_attachment(&file).await?;
                let id = match self.insert_attachment(fields, &file).await {
                    Ok(id) => id,
                    Err(e) => {
                        self.discard_attachment(&file).await;
                        return Err(e);
                    }
                };
                self.after_post_write(id).await?;
                Ok(id)
            }
            EntityKind::User => {
                let id = self.insert_user(fields).await?;
                self.after_write();
                Ok(id)
            }
        }
    }

    async fn update(&self, kind: EntityKind, id: TargetId, fields: &Fields) -> Result<()> {
        let (table, allowed, key) = match kind {
            EntityKind::Post | EntityKind::Image => (self.table("posts"), POST_UPDATE_COLUMNS, "ID"),
            EntityKind::User => (self.table("users"), USER_UPDATE_COLUMNS, "ID"),
        };
        let mut assignments = Vec::new();
        let mut binds = Vec::new();
        for column in allowed {
            if let Some(value) = fields.get(*column) {
                assignments.push(format!("{column} = ?"));
                binds.push(value_bind(Some(value)));
            }
        }
        if kind != EntityKind::User {
            let now = Self::now();
            assignments.push("post_modified = ?".to_string());
            assignments.push("post_modified_gmt = ?".to_string());
            binds.push(Bind::Text(now.clone()));
            binds.push(Bind::Text(now));
        }
        if assignments.is_empty() {
            return Ok(());
        }
        binds.push(Bind::UInt(id.0));

        let sql = format!("UPDATE {table} SET {} WHERE {key} = ?", assignments.join(", "));
        let result = bind_all(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        if result.rows_affected() == 0 {
            return Err(Error::SinkWrite(format!("Invalid {kind} ID {id}.")));
        }
        match kind {
            EntityKind::User => self.after_write(),
            _ => self.after_post_write(id).await?,
        }
        Ok(())
    }

    async fn add_meta(&self, kind: EntityKind, id: TargetId, key: &str, value: &Value) -> Result<()> {
        let (table, owner, _) = Self::meta_table(kind);
        let sql = format!(
            "INSERT INTO {} ({owner}, meta_key, meta_value) VALUES (?, ?, ?)",
            self.table(table)
        );
        sqlx::query(&sql)
            .bind(id.0)
            .bind(key)
            .bind(meta_string(value))
            .execute(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        Ok(())
    }

    async fn find_by_meta(&self, kind: EntityKind, key: &str, value: &str) -> Result<Option<TargetId>> {
        let cache_key = (kind == EntityKind::User, key.to_string(), value.to_string());
        if let Some(id) = self.cache().get(&cache_key) {
            return Ok(Some(*id));
        }

        let (table, owner, order) = Self::meta_table(kind);
        let sql = format!(
            "SELECT {owner} FROM {} WHERE meta_key = ? AND meta_value = ? ORDER BY {order} LIMIT 1",
            self.table(table)
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id = TargetId(row.try_get::<u64, _>(0).map_err(Error::write_failed)?);
        self.cache().insert(cache_key, id);
        Ok(Some(id))
    }

    async fn meta_index(&self, kind: EntityKind, key: &str) -> Result<Vec<(String, TargetId)>> {
        let (table, owner, order) = Self::meta_table(kind);
        let sql = format!(
            "SELECT meta_value, {owner} FROM {} WHERE meta_key = ? ORDER BY {order}",
            self.table(table)
        );
        let rows = sqlx::query(&sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        rows.iter()
            .map(|row| {
                let value: Option<String> = row.try_get(0).map_err(Error::write_failed)?;
                let id: u64 = row.try_get(1).map_err(Error::write_failed)?;
                Ok((value.unwrap_or_default(), TargetId(id)))
            })
            .collect()
    }

    async fn attachment_url(&self, id: TargetId) -> Result<Option<String>> {
        let sql = format!(
            "SELECT meta_value FROM {} WHERE post_id = ? AND meta_key = ? ORDER BY meta_id LIMIT 1",
            self.table("postmeta")
        );
        let row = sqlx::query(&sql)
            .bind(id.0)
            .bind(ATTACHED_FILE_META_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::write_failed)?;
        let file: Option<String> = match row {
            Some(row) => row.try_get(0).map_err(Error::write_failed)?,
            None => None,
        };
        Ok(file
            .filter(|f| !f.is_empty())
            .map(|f| format!("{}/{}", self.uploads_url, f.trim_start_matches('/'))))
    }

    async fn finish_import(&self) -> Result<()> {
        let tt = self.table("term_taxonomy");
        let tr = self.table("term_relationships");
        let sql = format!(
            "UPDATE {tt} SET count = (SELECT COUNT(*) FROM {tr} WHERE {tr}.term_taxonomy_id = {tt}.term_taxonomy_id)"
        );
        let terms = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(Error::write_failed)?
            .rows_affected();

        let sql = format!(
            "UPDATE {posts} SET comment_count = (SELECT COUNT(*) FROM {comments} WHERE \
             {comments}.comment_post_ID = {posts}.ID AND {comments}.comment_approved = '1')",
            posts = self.table("posts"),
            comments = self.table("comments")
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(Error::write_failed)?;

        let sql = format!("SELECT DISTINCT taxonomy FROM {tt}");
        let taxonomies: Vec<String> = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::write_failed)?
            .iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect();
        if !taxonomies.is_empty() {
            let placeholders = vec!["?"; taxonomies.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE option_name IN ({placeholders})",
                self.table("options")
            );
            let binds = taxonomies
                .iter()
                .map(|t| Bind::Text(format!("{t}_children")))
                .collect();
            bind_all(sqlx::query(&sql), binds)
                .execute(&self.pool)
                .await
                .map_err(Error::write_failed)?;
        }

        self.cache().clear();
        info!(
            "Recounted {} term taxonomies and all comment counts, cleared {} hierarchy caches",
            terms,
            taxonomies.len()
        );
        Ok(())
    }

    fn state(&self) -> &StoreState {
        &self.state
    }
}
