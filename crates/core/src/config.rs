//! Configuration types shared across crates.
//!
//! Configuration is loaded with figment from a TOML file plus `SATCHEL_`
//! prefixed environment variables, and validated eagerly when authorities
//! are constructed.

use crate::error::{Error, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default download attempt limit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default download rate limit, in requests per minute.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: f64 = 30.0;

/// Top-level provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Directory for temporarily staging downloaded content.
    pub staging_path: PathBuf,
    /// Cache root for permanent app content.
    pub app_cache_path: PathBuf,
    /// Cache root for OS-reclaimable downloaded content.
    pub content_cache_path: PathBuf,
    /// Path to the command queue database.
    #[serde(default = "default_queue_db")]
    pub queue_db: PathBuf,
    /// Whether executed queue records are deleted (true) or kept with a
    /// terminal status for diagnostics (false).
    #[serde(default = "default_delete_executed")]
    pub delete_executed_queue_records: bool,
    /// Content authorities, keyed by authority name.
    #[serde(default)]
    pub authorities: HashMap<String, AuthorityConfig>,
}

/// Configuration for a single content authority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// The remote CMS the authority syncs from.
    pub cms: CmsSettings,
    /// Interval between content refreshes, in minutes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: f64,
    /// Path to the authority's file database.
    pub file_db: PathBuf,
    /// Filesets, keyed by category name.
    #[serde(default)]
    pub filesets: HashMap<String, FilesetConfig>,
    /// Record type converters, keyed by declared type name.
    #[serde(default = "default_record_types")]
    pub record_types: HashMap<String, String>,
    /// Query type converters, keyed by declared type name.
    #[serde(default = "default_query_types")]
    pub query_types: HashMap<String, String>,
    /// Maximum download attempts before a fetch fails permanently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Download rate limit, in requests per minute.
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: f64,
}

/// Connection settings for a remote CMS repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CmsSettings {
    /// CMS host name, e.g. "cms.example.com".
    pub host: String,
    /// Optional port; omitted from URLs when not set.
    #[serde(default)]
    pub port: Option<u16>,
    /// Whether to use https.
    #[serde(default = "default_secure")]
    pub secure: bool,
    /// The CMS account name.
    pub account: String,
    /// The content repository name.
    pub repo: String,
    /// The repository branch to sync.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// The authentication realm credentials are stored under.
    pub auth_realm: String,
}

impl CmsSettings {
    fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }

    /// URL of the update feed for this repository.
    pub fn feed_url(&self) -> String {
        format!(
            "{}/{}/{}/updates/{}",
            self.base_url(),
            self.account,
            self.repo,
            self.branch
        )
    }

    /// URL of a content file within the repository.
    pub fn file_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/files/{}/{}",
            self.base_url(),
            self.account,
            self.repo,
            self.branch,
            path.trim_start_matches('/')
        )
    }

    /// URL of the authentication probe endpoint.
    pub fn authenticate_url(&self) -> String {
        format!(
            "{}/{}/{}/authenticate",
            self.base_url(),
            self.account,
            self.repo
        )
    }
}

/// A configured category of files sharing one caching policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesetConfig {
    /// Mapping names supported by the fileset.
    #[serde(default)]
    pub mappings: Vec<String>,
    /// The fileset's caching policy.
    #[serde(default)]
    pub cache: CachePolicy,
    /// Whether the fileset's content should be downloaded and cached.
    #[serde(default = "default_cachable")]
    pub cachable: bool,
}

/// Where, if anywhere, fetched files of a category are persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Always fetched from the server, never cached locally.
    #[default]
    None,
    /// Stored in the content cache; the OS may reclaim the space, after
    /// which the content must be downloaded again.
    Content,
    /// Stored in the app cache; removed only when the app is uninstalled.
    App,
}

impl ProviderConfig {
    /// Load configuration from a TOML file with `SATCHEL_` env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SATCHEL_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Look up an authority configuration by name.
    pub fn authority(&self, name: &str) -> Option<&AuthorityConfig> {
        self.authorities.get(name)
    }
}

fn default_queue_db() -> PathBuf {
    PathBuf::from("queue.sqlite")
}

fn default_delete_executed() -> bool {
    true
}

fn default_refresh_interval() -> f64 {
    60.0
}

fn default_record_types() -> HashMap<String, String> {
    HashMap::from([("json".to_string(), "record".to_string())])
}

fn default_query_types() -> HashMap<String, String> {
    HashMap::from([("json".to_string(), "results".to_string())])
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_requests_per_minute() -> f64 {
    DEFAULT_MAX_REQUESTS_PER_MINUTE
}

fn default_secure() -> bool {
    true
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_cachable() -> bool {
    true
}
