//! The CMS command protocol: the `refresh` and `deploy` sub-commands an
//! authority registers under its own name.
//!
//! `refresh` fetches the update feed since the last known commit and chains
//! `get` downloads into staging followed by a `deploy` step carrying the
//! feed's records in its queue args. `deploy` runs only once every download
//! has landed: it ingests and prunes in one transaction, then moves staged
//! files into their resolved cache locations and marks them clean. A failed
//! download abandons the batch before ingest, so the previously cached
//! content stays intact. Both steps are re-runnable from their queue records
//! after a crash.

use crate::auth::AuthManager;
use crate::authority::{RefreshPhase, RefreshState};
use crate::commands::GetUrlCommand;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use async_trait::async_trait;
use satchel_core::CmsSettings;
use satchel_db::{DbError, FILE_STATUS_CLEAN, FILE_STATUS_STAGED, FileDb, Record, UpdateSet};
use satchel_scheduler::{Command, CommandItem, SchedulerError, SchedulerResult, parse_args};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The update feed body returned by the CMS.
#[derive(Debug, Default, Deserialize)]
struct Feed {
    #[serde(default)]
    commits: Vec<Record>,
    #[serde(default)]
    posts: Vec<Record>,
    #[serde(default)]
    files: Vec<Record>,
}

pub struct CmsCommandProtocol {
    authority: String,
    settings: CmsSettings,
    file_db: Arc<FileDb>,
    http: Arc<dyn HttpClient>,
    auth: Arc<AuthManager>,
    staging_path: PathBuf,
    state: Arc<RefreshState>,
    get: GetUrlCommand,
}

impl CmsCommandProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        authority: impl Into<String>,
        settings: CmsSettings,
        file_db: Arc<FileDb>,
        http: Arc<dyn HttpClient>,
        auth: Arc<AuthManager>,
        staging_path: PathBuf,
        state: Arc<RefreshState>,
        max_retries: u32,
        max_requests_per_minute: f64,
    ) -> Self {
        let get = GetUrlCommand::new(http.clone(), max_retries, max_requests_per_minute);
        Self {
            authority: authority.into(),
            settings,
            file_db,
            http,
            auth,
            staging_path,
            state,
            get,
        }
    }

    /// Staging directory for this authority's downloads.
    fn staging_root(&self) -> PathBuf {
        self.staging_path.join(&self.authority)
    }

    async fn refresh(&self) -> SyncResult<Vec<CommandItem>> {
        self.state.set_phase(RefreshPhase::Refreshing);

        let credential = self.auth.active_credential()?;
        let mut params = Vec::new();
        if let Some(commit) = self.file_db.latest_commit().await? {
            params.push(("since".to_string(), commit));
        }
        let response = self
            .http
            .get(&self.settings.feed_url(), &params, credential.as_ref())
            .await?;
        if response.status == 401 || response.status == 403 {
            return Err(SyncError::Authentication(format!(
                "update feed rejected with status {}",
                response.status
            )));
        }
        if !response.is_success() {
            return Err(SyncError::Network(format!(
                "update feed failed with status {}",
                response.status
            )));
        }
        let feed: Feed = response.json()?;
        if feed.commits.is_empty() && feed.posts.is_empty() && feed.files.is_empty() {
            tracing::debug!(authority = %self.authority, "update feed is empty");
            self.state.mark_refreshed();
            return Ok(Vec::new());
        }

        // Records without a version stamp get the next local version, so
        // pruning can distinguish this cycle's rows from stale ones.
        let version = self.file_db.latest_version().await? + 1;
        let mut updates = UpdateSet {
            commits: feed.commits,
            posts: feed.posts,
            files: feed.files,
        };
        stamp_version(&mut updates.commits, version);
        stamp_version(&mut updates.posts, version);
        stamp_version(&mut updates.files, version);

        let mut follow_ups = Vec::new();
        for file in &mut updates.files {
            let Some(path) = file.get("path").and_then(Value::as_str).map(String::from) else {
                continue;
            };
            let category = file
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let cache = match self.file_db.cache_location_for_fileset(&category) {
                Ok(cache) => cache,
                Err(DbError::UnknownCategory(_)) => {
                    tracing::warn!(authority = %self.authority, category, path, "file in unconfigured category");
                    None
                }
                Err(e) => return Err(e.into()),
            };
            if cache.is_some() {
                file.insert(
                    "status".to_string(),
                    Value::from(FILE_STATUS_STAGED),
                );
                let staged = self.staging_root().join(&path);
                follow_ups.push(CommandItem::new(
                    format!("{}.get", self.authority),
                    vec![
                        json!(self.settings.file_url(&path)),
                        json!(staged.to_string_lossy()),
                    ],
                ));
            } else {
                file.insert("status".to_string(), Value::from(FILE_STATUS_CLEAN));
            }
        }

        tracing::info!(
            authority = %self.authority,
            commits = updates.commits.len(),
            posts = updates.posts.len(),
            files = updates.files.len(),
            downloads = follow_ups.len(),
            "update feed staged"
        );

        // Ingest is deferred to deploy, which runs after every download has
        // succeeded; the records ride along in the deploy queue args.
        let payload = json!({
            "commits": updates.commits,
            "posts": updates.posts,
            "files": updates.files,
        });
        self.state.set_phase(RefreshPhase::Staging);
        follow_ups.push(CommandItem::new(
            format!("{}.deploy", self.authority),
            vec![payload],
        ));
        Ok(follow_ups)
    }

    async fn deploy(&self, args: &[Value]) -> SyncResult<Vec<CommandItem>> {
        self.state.set_phase(RefreshPhase::Deploying);

        if let Some(value) = args.first() {
            let feed: Feed = serde_json::from_value(value.clone())
                .map_err(|e| SyncError::Config(format!("deploy: bad updates payload: {e}")))?;
            let updates = UpdateSet {
                commits: feed.commits,
                posts: feed.posts,
                files: feed.files,
            };
            let pruned = self.file_db.apply_updates(&updates).await?;
            tracing::info!(authority = %self.authority, pruned, "update feed ingested");
        }

        let staged = self.file_db.files_with_status(FILE_STATUS_STAGED).await?;
        for record in staged {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| SyncError::Storage(DbError::Internal(
                    "staged file record has no id".to_string(),
                )))?
                .to_string();
            let path = record
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let Some(dest) = self.file_db.cache_location_for_file(&record)? else {
                self.file_db.set_file_status(&id, FILE_STATUS_CLEAN).await?;
                continue;
            };
            let source = self.staging_root().join(&path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(e) = tokio::fs::rename(&source, &dest).await {
                let already_deployed = e.kind() == std::io::ErrorKind::NotFound
                    && tokio::fs::try_exists(&dest).await.unwrap_or(false);
                if !already_deployed {
                    // Rename fails across filesystem boundaries.
                    tokio::fs::copy(&source, &dest).await?;
                    let _ = tokio::fs::remove_file(&source).await;
                }
            }
            self.file_db.set_file_status(&id, FILE_STATUS_CLEAN).await?;
        }

        self.state.mark_refreshed();
        tracing::info!(authority = %self.authority, "content deploy complete");
        Ok(Vec::new())
    }

    /// Download one content file into staging, with this authority's retry
    /// and rate limits.
    async fn get_file(&self, args: &[Value]) -> SyncResult<Vec<CommandItem>> {
        let args = parse_args(args, &["url", "filename"], &Map::new())?;
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Config("get: missing 'url' argument".to_string()))?;
        let filename = args
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Config("get: missing 'filename' argument".to_string()))?;
        self.get.fetch(url, Path::new(filename)).await?;
        Ok(Vec::new())
    }
}

fn stamp_version(records: &mut [Record], version: i64) {
    for record in records {
        record
            .entry("version".to_string())
            .or_insert_with(|| Value::from(version));
    }
}

#[async_trait]
impl Command for CmsCommandProtocol {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>> {
        let result = match name {
            "refresh" => self.refresh().await,
            "deploy" => self.deploy(args).await,
            "get" => self.get_file(args).await,
            other => {
                return Err(SchedulerError::UnknownCommand(format!(
                    "{}.{other}",
                    self.authority
                )));
            }
        };
        match result {
            Ok(items) => Ok(items),
            Err(error) => {
                let failure =
                    SchedulerError::command_failed(format!("{}.{name}", self.authority), &error);
                self.state.fail(error);
                Err(failure)
            }
        }
    }
}
