//! The file database: indexes cached CMS content.
//!
//! Holds one source table of posts plus related file and commit tables,
//! mapped through the ORM layer. Ingest runs as a bulk upsert followed by a
//! version prune in one transaction, so readers never observe a half-pruned
//! relation set.

use crate::client::{Database, Record, execute_on};
use crate::error::{DbError, DbResult};
use crate::orm::{Orm, OrmModel, OrmRelation, RelationKind};
use satchel_core::{CachePolicy, FilesetConfig};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// The file database schema.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    id      TEXT PRIMARY KEY,
    branch  TEXT,
    date    TEXT,
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS posts (
    id        TEXT PRIMARY KEY,
    type      TEXT,
    title     TEXT,
    body      TEXT,
    image     TEXT,
    commit_id TEXT,
    status    TEXT,
    version   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id       TEXT PRIMARY KEY,
    post_id  TEXT,
    category TEXT,
    path     TEXT,
    status   TEXT,
    version  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_post ON files (post_id);
CREATE INDEX IF NOT EXISTS idx_files_path ON files (path);
CREATE INDEX IF NOT EXISTS idx_files_category ON files (category);
"#;

const COMMIT_COLUMNS: &[&str] = &["id", "branch", "date", "version"];
const POST_COLUMNS: &[&str] = &[
    "id", "type", "title", "body", "image", "commit_id", "status", "version",
];
const FILE_COLUMNS: &[&str] = &["id", "post_id", "category", "path", "status", "version"];

/// File status once its content sits in the resolved cache location.
pub const FILE_STATUS_CLEAN: &str = "clean";
/// File status while its content is staged but not yet deployed.
pub const FILE_STATUS_STAGED: &str = "staged";

/// One refresh cycle's worth of record updates.
#[derive(Clone, Debug, Default)]
pub struct UpdateSet {
    pub commits: Vec<Record>,
    pub posts: Vec<Record>,
    pub files: Vec<Record>,
}

/// A database of cached file and post records for one content authority.
#[derive(Clone)]
pub struct FileDb {
    db: Database,
    orm: Orm,
    filesets: HashMap<String, FilesetConfig>,
    content_cache_path: PathBuf,
    app_cache_path: PathBuf,
}

impl FileDb {
    /// Create a file database over an open store.
    pub async fn new(
        db: Database,
        filesets: HashMap<String, FilesetConfig>,
        content_cache_path: PathBuf,
        app_cache_path: PathBuf,
    ) -> DbResult<Self> {
        db.execute(SCHEMA_SQL, &[]).await?;
        let orm = Orm::new(db.clone(), Self::model());
        Ok(Self {
            db,
            orm,
            filesets,
            content_cache_path,
            app_cache_path,
        })
    }

    /// The declared ORM model: posts with attachments, an optional image
    /// file, and the commit each post arrived in.
    fn model() -> OrmModel {
        let mut relations = BTreeMap::new();
        relations.insert(
            "attachments".to_string(),
            OrmRelation {
                kind: RelationKind::OneMany,
                table: "files".to_string(),
                key: "post_id".to_string(),
                key_value: Some("{id}".to_string()),
                foreign_key: None,
                version_column: Some("version".to_string()),
            },
        );
        relations.insert(
            "image".to_string(),
            OrmRelation {
                kind: RelationKind::OneOne,
                table: "files".to_string(),
                key: "id".to_string(),
                key_value: Some("{image}".to_string()),
                foreign_key: None,
                version_column: None,
            },
        );
        relations.insert(
            "commit".to_string(),
            OrmRelation {
                kind: RelationKind::ManyOne,
                table: "commits".to_string(),
                key: "id".to_string(),
                key_value: None,
                foreign_key: Some("commit_id".to_string()),
                version_column: None,
            },
        );
        OrmModel {
            source: "posts".to_string(),
            key: "id".to_string(),
            version_column: "version".to_string(),
            relations,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    /// The highest ingested version stamp, or 0 for an empty database.
    pub async fn latest_version(&self) -> DbResult<i64> {
        let row = self
            .db
            .query_one("SELECT MAX(version) AS version FROM commits", &[])
            .await?;
        Ok(row
            .and_then(|r| r.get("version").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    /// The latest synced commit id, if any.
    pub async fn latest_commit(&self) -> DbResult<Option<String>> {
        let row = self
            .db
            .query_one("SELECT id FROM commits ORDER BY version DESC LIMIT 1", &[])
            .await?;
        Ok(row.and_then(|r| r.get("id").and_then(Value::as_str).map(String::from)))
    }

    /// Apply one refresh cycle of updates: bulk upsert followed by a
    /// version prune, in a single transaction. Returns the number of
    /// pruned related rows.
    pub async fn apply_updates(&self, updates: &UpdateSet) -> DbResult<u64> {
        let mut tx = self.db.begin().await?;
        for record in &updates.commits {
            upsert(&mut tx, "commits", COMMIT_COLUMNS, record).await?;
        }
        for record in &updates.posts {
            upsert(&mut tx, "posts", POST_COLUMNS, record).await?;
        }
        for record in &updates.files {
            upsert(&mut tx, "files", FILE_COLUMNS, record).await?;
        }
        let pruned = self.orm.prune_related_on(&mut tx).await?;
        tx.commit().await?;
        tracing::info!(
            commits = updates.commits.len(),
            posts = updates.posts.len(),
            files = updates.files.len(),
            pruned,
            "applied content updates"
        );
        Ok(pruned)
    }

    /// Read a post with all relations joined.
    pub async fn post(&self, key: &str) -> DbResult<Option<Record>> {
        self.orm.select_key(key).await
    }

    /// Query posts with all relations joined.
    pub async fn query_posts(&self, condition: &str, values: &[Value]) -> DbResult<Vec<Record>> {
        self.orm.select_where(condition, values).await
    }

    /// Delete a post and its exclusively-owned related rows.
    pub async fn delete_post(&self, key: &str) -> DbResult<bool> {
        self.orm.delete_key(key).await
    }

    /// Read a file record by its id.
    pub async fn file_record(&self, id: &str) -> DbResult<Option<Record>> {
        self.db
            .query_one("SELECT * FROM files WHERE id = ?", &[Value::from(id)])
            .await
    }

    /// Read a file record by its repository path.
    pub async fn file_record_by_path(&self, path: &str) -> DbResult<Option<Record>> {
        self.db
            .query_one("SELECT * FROM files WHERE path = ?", &[Value::from(path)])
            .await
    }

    /// List file records in a fileset category.
    pub async fn files_in_category(&self, category: &str) -> DbResult<Vec<Record>> {
        self.db
            .query(
                "SELECT * FROM files WHERE category = ? ORDER BY path",
                &[Value::from(category)],
            )
            .await
    }

    /// List file records carrying the given status.
    pub async fn files_with_status(&self, status: &str) -> DbResult<Vec<Record>> {
        self.db
            .query(
                "SELECT * FROM files WHERE status = ? ORDER BY path",
                &[Value::from(status)],
            )
            .await
    }

    /// Update a file record's status.
    pub async fn set_file_status(&self, id: &str, status: &str) -> DbResult<()> {
        self.db
            .execute(
                "UPDATE files SET status = ? WHERE id = ?",
                &[Value::from(status), Value::from(id)],
            )
            .await?;
        Ok(())
    }

    /// The fileset configuration for a category.
    pub fn fileset(&self, category: &str) -> DbResult<&FilesetConfig> {
        self.filesets
            .get(category)
            .ok_or_else(|| DbError::UnknownCategory(category.to_string()))
    }

    /// All configured fileset categories.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.filesets.keys().map(String::as_str)
    }

    /// Resolve the cache root for a fileset category.
    ///
    /// Returns `None` for non-cachable categories and the `none` policy;
    /// otherwise a deterministic path under the policy's cache root.
    pub fn cache_location_for_fileset(&self, category: &str) -> DbResult<Option<PathBuf>> {
        let fileset = self.fileset(category)?;
        if !fileset.cachable {
            return Ok(None);
        }
        let root = match fileset.cache {
            CachePolicy::None => return Ok(None),
            CachePolicy::Content => &self.content_cache_path,
            CachePolicy::App => &self.app_cache_path,
        };
        Ok(Some(root.join(category)))
    }

    /// Resolve the on-disk cache location for a file record.
    pub fn cache_location_for_file(&self, record: &Record) -> DbResult<Option<PathBuf>> {
        let category = record
            .get("category")
            .and_then(Value::as_str)
            .ok_or_else(|| DbError::Internal("file record has no category".to_string()))?;
        let path = record
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| DbError::Internal("file record has no path".to_string()))?;
        Ok(self
            .cache_location_for_fileset(category)?
            .map(|root| root.join(path.trim_start_matches('/'))))
    }
}

/// Upsert one record into a table, keyed on `id`.
async fn upsert(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    table: &str,
    columns: &[&str],
    record: &Record,
) -> DbResult<()> {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns
        .iter()
        .filter(|c| **c != "id")
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders}) \
         ON CONFLICT(id) DO UPDATE SET {updates}",
        columns.join(", ")
    );
    let params: Vec<Value> = columns
        .iter()
        .map(|c| record.get(*c).cloned().unwrap_or(Value::Null))
        .collect();
    execute_on(&mut **tx, &sql, &params).await?;
    Ok(())
}
