//! The content authority: owns one CMS repository's local mirror and
//! resolves content paths against it.
//!
//! Refresh runs through the shared scheduler as `{name}.refresh` followed by
//! staged downloads and `{name}.deploy`. The authority observes the outcome
//! through a [`RefreshState`] shared with its protocol instance; a failed
//! cycle leaves the previous cache state fully readable.

use crate::auth::AuthManager;
use crate::converter::{ContentData, ConverterSet};
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use crate::path_root::{
    FilesetCategoryPathRoot, PathRoot, PostsPathRoot, ResolveContext, requested_type,
};
use satchel_core::{AuthorityConfig, CmsSettings, ContentPath};
use satchel_db::FileDb;
use satchel_scheduler::CommandScheduler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Where an authority currently is in its refresh cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Refreshing,
    Staging,
    Deploying,
    Failed,
}

#[derive(Default)]
struct RefreshStateInner {
    phase: RefreshPhase,
    error: Option<SyncError>,
    last_refresh: Option<Instant>,
}

/// Refresh-cycle state shared between an authority and its protocol.
///
/// Commands run on the scheduler drain, outside the authority's call stack;
/// the typed error of a failed cycle is parked here and taken by the caller
/// after the drain returns.
#[derive(Default)]
pub struct RefreshState {
    inner: Mutex<RefreshStateInner>,
}

impl RefreshState {
    pub fn phase(&self) -> RefreshPhase {
        self.inner.lock().expect("refresh state poisoned").phase
    }

    pub(crate) fn set_phase(&self, phase: RefreshPhase) {
        self.inner.lock().expect("refresh state poisoned").phase = phase;
    }

    /// Record a failed cycle and its error.
    pub(crate) fn fail(&self, error: SyncError) {
        let mut inner = self.inner.lock().expect("refresh state poisoned");
        inner.phase = RefreshPhase::Failed;
        inner.error = Some(error);
    }

    /// Record a completed cycle.
    pub(crate) fn mark_refreshed(&self) {
        let mut inner = self.inner.lock().expect("refresh state poisoned");
        inner.phase = RefreshPhase::Idle;
        inner.last_refresh = Some(Instant::now());
    }

    /// Take the error of the last failed cycle, if any.
    pub(crate) fn take_error(&self) -> Option<SyncError> {
        self.inner
            .lock()
            .expect("refresh state poisoned")
            .error
            .take()
    }

    fn last_refresh(&self) -> Option<Instant> {
        self.inner
            .lock()
            .expect("refresh state poisoned")
            .last_refresh
    }
}

/// A named content authority.
pub struct ContentAuthority {
    name: String,
    refresh_interval: Duration,
    cms: CmsSettings,
    file_db: Arc<FileDb>,
    auth: Arc<AuthManager>,
    state: Arc<RefreshState>,
    converters: ConverterSet,
    roots: HashMap<String, Box<dyn PathRoot>>,
    scheduler: Arc<CommandScheduler>,
    http: Arc<dyn HttpClient>,
}

impl ContentAuthority {
    /// Assemble an authority from its constructed parts.
    ///
    /// Converters and filesets are validated before this is called; the
    /// authority registers a path root per fileset category plus `posts`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        config: &AuthorityConfig,
        file_db: Arc<FileDb>,
        auth: Arc<AuthManager>,
        state: Arc<RefreshState>,
        converters: ConverterSet,
        scheduler: Arc<CommandScheduler>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        let mut roots: HashMap<String, Box<dyn PathRoot>> = HashMap::new();
        for category in config.filesets.keys() {
            roots.insert(
                category.clone(),
                Box::new(FilesetCategoryPathRoot::new(category.clone())),
            );
        }
        roots.insert("posts".to_string(), Box::new(PostsPathRoot));
        Self {
            name,
            refresh_interval: Duration::from_secs_f64(config.refresh_interval * 60.0),
            cms: config.cms.clone(),
            file_db,
            auth,
            state,
            converters,
            roots,
            scheduler,
            http,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> RefreshPhase {
        self.state.phase()
    }

    pub fn file_db(&self) -> &FileDb {
        &self.file_db
    }

    /// Refresh content if the configured interval has elapsed.
    pub async fn refresh_content(&self) -> SyncResult<()> {
        if !self.refresh_due() {
            tracing::debug!(authority = %self.name, "refresh interval not yet elapsed");
            return Ok(());
        }
        self.sync_now().await
    }

    fn refresh_due(&self) -> bool {
        match self.state.last_refresh() {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Run a full refresh cycle synchronously.
    ///
    /// Appends `{name}.refresh`, drains the queue, and surfaces the typed
    /// error of a failed cycle.
    pub async fn sync_now(&self) -> SyncResult<()> {
        // Drop any stale error from an earlier cycle.
        let _ = self.state.take_error();
        self.scheduler
            .append_command(&format!("{}.refresh", self.name), &[])
            .await?;
        self.scheduler.execute_queue().await?;
        match self.state.take_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Store credentials, probe the authenticated endpoint, and refresh.
    ///
    /// Rejected credentials are cleared and the authority stays logged out.
    pub async fn login(&self, username: &str, password: &str) -> SyncResult<()> {
        self.auth.login(username, password)?;
        let credential = self
            .auth
            .active_credential()?
            .ok_or_else(|| SyncError::Authentication("credential store is empty".to_string()))?;
        let probe = self
            .http
            .post(&self.cms.authenticate_url(), &[], Some(&credential))
            .await;
        match probe {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                self.auth.logout()?;
                return Err(SyncError::Authentication(format!(
                    "authentication rejected with status {}",
                    response.status
                )));
            }
            Err(error) => {
                self.auth.logout()?;
                return Err(error);
            }
        }
        tracing::info!(authority = %self.name, user = username, "logged in");
        self.sync_now().await
    }

    pub fn is_logged_in(&self) -> SyncResult<bool> {
        self.auth.is_logged_in()
    }

    /// Clear stored credentials.
    pub fn logout(&self) -> SyncResult<()> {
        tracing::info!(authority = %self.name, "logged out");
        self.auth.logout()
    }

    /// Resolve a content path against this authority's local mirror.
    pub async fn resolve(
        &self,
        path: &ContentPath,
        params: &HashMap<String, String>,
    ) -> SyncResult<ContentData> {
        let root_name = path.root();
        let root = self
            .roots
            .get(root_name)
            .ok_or_else(|| SyncError::PathNotFound {
                authority: self.name.clone(),
                root: root_name.to_string(),
            })?;
        let ctx = ResolveContext {
            file_db: &self.file_db,
            converters: &self.converters,
        };
        root.resolve(&ctx, path.rest().as_ref(), requested_type(path), params)
            .await
    }
}
