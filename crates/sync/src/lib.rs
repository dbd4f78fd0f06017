//! Content synchronization and resolution for satchel.
//!
//! This crate composes the storage and scheduling layers into the client
//! surface:
//! - Capability traits for HTTP transport, credential storage, and archive
//!   extraction, with reqwest / OS keychain / zip implementations
//! - Built-in commands (download-zip, unzip, rm) and the CMS protocol
//!   (refresh, deploy, get) run on the shared scheduler
//! - Content authorities: refresh state machine, login/logout, typed
//!   converters, path roots
//! - The content provider resolving `content://{authority}/{path}` addresses

pub mod archive;
pub mod auth;
pub mod authority;
pub mod commands;
pub mod converter;
pub mod error;
pub mod http;
pub mod path_root;
pub mod protocol;
pub mod provider;

pub use archive::{ArchiveUnpacker, ZipUnpacker};
pub use auth::{AuthManager, Credential, CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use authority::{ContentAuthority, RefreshPhase, RefreshState};
pub use commands::{DownloadZipCommand, GetUrlCommand, RemoveFileCommand, UnzipCommand};
pub use converter::{ContentData, ConverterSet, QueryConverter, RecordConverter};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use path_root::{FilesetCategoryPathRoot, PathRoot, PostsPathRoot, ResolveContext};
pub use protocol::CmsCommandProtocol;
pub use provider::ContentProvider;
