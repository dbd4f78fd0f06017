//! Core domain types for the satchel content synchronization engine.
//!
//! This crate defines the types shared by every other crate:
//! - Content paths and `content://` addresses
//! - Fileset cache policies
//! - CMS connection settings and the configuration surface

pub mod config;
pub mod content_path;
pub mod error;

pub use config::{
    AuthorityConfig, CachePolicy, CmsSettings, DEFAULT_MAX_REQUESTS_PER_MINUTE,
    DEFAULT_MAX_RETRIES, FilesetConfig, ProviderConfig,
};
pub use content_path::{CONTENT_SCHEME, ContentAddress, ContentPath};
pub use error::{Error, Result};
