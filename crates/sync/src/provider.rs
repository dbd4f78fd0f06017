//! The content provider: top-level composition of named authorities over a
//! shared command scheduler.
//!
//! The provider is an explicitly constructed instance; callers hold and pass
//! it where content is resolved. Fileset and converter configuration is
//! validated here, so a misconfigured authority fails construction instead
//! of the first resolution.

use crate::archive::{ArchiveUnpacker, ZipUnpacker};
use crate::auth::{AuthManager, CredentialStore, KeyringCredentialStore};
use crate::authority::{ContentAuthority, RefreshState};
use crate::commands::{DownloadZipCommand, GetUrlCommand, RemoveFileCommand, UnzipCommand};
use crate::converter::{ContentData, ConverterSet};
use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, ReqwestClient};
use crate::protocol::CmsCommandProtocol;
use satchel_core::{
    ContentAddress, DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_MAX_RETRIES, ProviderConfig,
};
use satchel_db::{Database, FileDb};
use satchel_scheduler::CommandScheduler;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A configured set of content authorities sharing one scheduler.
pub struct ContentProvider {
    scheduler: Arc<CommandScheduler>,
    authorities: HashMap<String, ContentAuthority>,
}

impl ContentProvider {
    /// Build a provider with the default capabilities: reqwest transport,
    /// OS keychain credential storage, and zip archives.
    pub async fn new(config: ProviderConfig) -> SyncResult<Self> {
        Self::with_capabilities(
            config,
            Arc::new(ReqwestClient::new()),
            Arc::new(KeyringCredentialStore),
            Arc::new(ZipUnpacker),
        )
        .await
    }

    /// Build a provider over explicit capability implementations.
    pub async fn with_capabilities(
        config: ProviderConfig,
        http: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialStore>,
        unpacker: Arc<dyn ArchiveUnpacker>,
    ) -> SyncResult<Self> {
        let queue_db = Database::open(&config.queue_db).await?;
        let mut scheduler = CommandScheduler::new(queue_db).await?;
        scheduler.set_delete_executed(config.delete_executed_queue_records);
        // Authorities download through their protocol's `get`, which carries
        // per-authority retry and rate limits; this one serves ad-hoc use.
        scheduler.register_command(
            "get",
            Arc::new(GetUrlCommand::new(
                http.clone(),
                DEFAULT_MAX_RETRIES,
                DEFAULT_MAX_REQUESTS_PER_MINUTE,
            )),
        );
        scheduler.register_command("download-zip", Arc::new(DownloadZipCommand::new(http.clone())));
        scheduler.register_command("unzip", Arc::new(UnzipCommand::new(unpacker)));
        scheduler.register_command("rm", Arc::new(RemoveFileCommand));

        let mut assembled = Vec::new();
        for (name, authority_config) in &config.authorities {
            let db = Database::open(&authority_config.file_db).await?;
            let file_db = Arc::new(
                FileDb::new(
                    db,
                    authority_config.filesets.clone(),
                    config.content_cache_path.join(name),
                    config.app_cache_path.join(name),
                )
                .await?,
            );
            let converters = ConverterSet::from_config(
                &authority_config.record_types,
                &authority_config.query_types,
            )?;
            let auth = Arc::new(AuthManager::new(
                authority_config.cms.auth_realm.clone(),
                credentials.clone(),
            ));
            let state = Arc::new(RefreshState::default());
            let protocol = CmsCommandProtocol::new(
                name.clone(),
                authority_config.cms.clone(),
                file_db.clone(),
                http.clone(),
                auth.clone(),
                config.staging_path.clone(),
                state.clone(),
                authority_config.max_retries,
                authority_config.max_requests_per_minute,
            );
            scheduler.register_protocol(name.clone(), Arc::new(protocol));
            assembled.push((name.clone(), authority_config, file_db, auth, state, converters));
        }

        let scheduler = Arc::new(scheduler);
        let mut authorities = HashMap::new();
        for (name, authority_config, file_db, auth, state, converters) in assembled {
            let authority = ContentAuthority::new(
                name.clone(),
                authority_config,
                file_db,
                auth,
                state,
                converters,
                scheduler.clone(),
                http.clone(),
            );
            authorities.insert(name, authority);
        }
        tracing::info!(authorities = authorities.len(), "content provider ready");
        Ok(Self {
            scheduler,
            authorities,
        })
    }

    /// The shared command scheduler.
    pub fn scheduler(&self) -> &Arc<CommandScheduler> {
        &self.scheduler
    }

    /// Look up an authority by name.
    pub fn authority(&self, name: &str) -> SyncResult<&ContentAuthority> {
        self.authorities
            .get(name)
            .ok_or_else(|| SyncError::AuthorityNotFound(name.to_string()))
    }

    /// Names of all configured authorities.
    pub fn authority_names(&self) -> impl Iterator<Item = &str> {
        self.authorities.keys().map(String::as_str)
    }

    /// Refresh every authority whose interval has elapsed.
    pub async fn refresh_content(&self) -> SyncResult<()> {
        for authority in self.authorities.values() {
            authority.refresh_content().await?;
        }
        Ok(())
    }

    /// Resolve a `content://` address string.
    pub async fn resolve(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<ContentData> {
        let address = ContentAddress::parse(address)?;
        self.resolve_address(&address, cancel).await
    }

    /// Resolve a parsed content address.
    pub async fn resolve_address(
        &self,
        address: &ContentAddress,
        cancel: &CancellationToken,
    ) -> SyncResult<ContentData> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let authority = self.authority(&address.authority)?;
        let data = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = authority.resolve(&address.path, &address.params) => result?,
        };
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(data)
    }
}
