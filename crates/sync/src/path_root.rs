//! Path roots: the handlers selected by the first component of a content
//! path.
//!
//! An authority registers one root per fileset category plus a `posts` root.
//! A root exposes three lookup capabilities and a default dispatch that maps
//! the remaining path onto them and applies the declared converter for the
//! requested type.

use crate::converter::{ContentData, ConverterSet};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use satchel_core::ContentPath;
use satchel_db::{DbError, FileDb, Record};
use serde_json::Value;
use std::collections::HashMap;

/// Lookup context handed to a root by its authority.
pub struct ResolveContext<'a> {
    pub file_db: &'a FileDb,
    pub converters: &'a ConverterSet,
}

/// Type name requested by a path, taken from its extension.
pub fn requested_type(path: &ContentPath) -> &str {
    path.ext().unwrap_or("json")
}

#[async_trait]
pub trait PathRoot: Send + Sync {
    /// Query records matching the request parameters.
    async fn query(
        &self,
        ctx: &ResolveContext<'_>,
        params: &HashMap<String, String>,
    ) -> SyncResult<Vec<Record>>;

    /// Look up a single record by key.
    async fn entry_with_key(
        &self,
        ctx: &ResolveContext<'_>,
        key: &str,
    ) -> SyncResult<Option<Record>>;

    /// Look up a single record by the remaining path.
    async fn entry_with_path(
        &self,
        ctx: &ResolveContext<'_>,
        path: &ContentPath,
    ) -> SyncResult<Option<Record>>;

    /// Resolve a request forwarded by the authority.
    ///
    /// `rest` is the path after the root component, or `None` when the root
    /// was addressed directly. No remaining path dispatches to a query; a
    /// bare single component dispatches by key; anything else by path.
    async fn resolve(
        &self,
        ctx: &ResolveContext<'_>,
        rest: Option<&ContentPath>,
        type_name: &str,
        params: &HashMap<String, String>,
    ) -> SyncResult<ContentData> {
        match rest {
            None => {
                let rows = self.query(ctx, params).await?;
                Ok(ctx.converters.query(type_name)?.convert(rows))
            }
            Some(path) => {
                let record = if path.rest().is_none() && path.ext().is_none() {
                    self.entry_with_key(ctx, path.root()).await?
                } else {
                    self.entry_with_path(ctx, path).await?
                };
                let record = record.ok_or_else(|| {
                    SyncError::Storage(DbError::NotFound(format!(
                        "no record for '{}'",
                        path.root()
                    )))
                })?;
                ctx.converters.record(type_name)?.convert(record, ctx.file_db)
            }
        }
    }
}

/// The default root: serves the file records of one fileset category.
pub struct FilesetCategoryPathRoot {
    category: String,
}

impl FilesetCategoryPathRoot {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }

    /// Repository path of a file under this category.
    fn file_path(&self, rest: &ContentPath) -> String {
        format!("{}/{}", self.category, rest.relative_path())
    }
}

#[async_trait]
impl PathRoot for FilesetCategoryPathRoot {
    async fn query(
        &self,
        ctx: &ResolveContext<'_>,
        params: &HashMap<String, String>,
    ) -> SyncResult<Vec<Record>> {
        let mut rows = ctx.file_db.files_in_category(&self.category).await?;
        // Parameters filter by equality on record fields.
        rows.retain(|row| {
            params.iter().all(|(field, expected)| {
                row.get(field).and_then(Value::as_str) == Some(expected.as_str())
            })
        });
        Ok(rows)
    }

    async fn entry_with_key(
        &self,
        ctx: &ResolveContext<'_>,
        key: &str,
    ) -> SyncResult<Option<Record>> {
        Ok(ctx.file_db.file_record(key).await?)
    }

    async fn entry_with_path(
        &self,
        ctx: &ResolveContext<'_>,
        path: &ContentPath,
    ) -> SyncResult<Option<Record>> {
        Ok(ctx.file_db.file_record_by_path(&self.file_path(path)).await?)
    }
}

/// Serves post records with their relations joined.
pub struct PostsPathRoot;

/// Post columns queryable through request parameters.
const POST_QUERY_FIELDS: [&str; 3] = ["type", "status", "commit_id"];

#[async_trait]
impl PathRoot for PostsPathRoot {
    async fn query(
        &self,
        ctx: &ResolveContext<'_>,
        params: &HashMap<String, String>,
    ) -> SyncResult<Vec<Record>> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        for field in POST_QUERY_FIELDS {
            if let Some(value) = params.get(field) {
                conditions.push(format!("{field} = ?"));
                values.push(Value::from(value.as_str()));
            }
        }
        let condition = if conditions.is_empty() {
            "1 = 1".to_string()
        } else {
            conditions.join(" AND ")
        };
        Ok(ctx.file_db.query_posts(&condition, &values).await?)
    }

    async fn entry_with_key(
        &self,
        ctx: &ResolveContext<'_>,
        key: &str,
    ) -> SyncResult<Option<Record>> {
        Ok(ctx.file_db.post(key).await?)
    }

    async fn entry_with_path(
        &self,
        ctx: &ResolveContext<'_>,
        path: &ContentPath,
    ) -> SyncResult<Option<Record>> {
        // Posts are keyed, not pathed; the first remaining component is the
        // post id.
        self.entry_with_key(ctx, path.root()).await
    }
}
