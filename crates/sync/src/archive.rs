//! The archive extraction capability.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Abstract archive extraction capability.
#[async_trait]
pub trait ArchiveUnpacker: Send + Sync {
    /// Unpack an archive into a destination directory.
    async fn unpack(&self, archive: &Path, dest: &Path) -> SyncResult<()>;
}

/// Zip-backed unpacker. Extraction is synchronous, so it runs on the
/// blocking pool.
pub struct ZipUnpacker;

#[async_trait]
impl ArchiveUnpacker for ZipUnpacker {
    async fn unpack(&self, archive: &Path, dest: &Path) -> SyncResult<()> {
        let archive = PathBuf::from(archive);
        let dest = PathBuf::from(dest);
        tokio::task::spawn_blocking(move || -> SyncResult<()> {
            let file = File::open(&archive)?;
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| SyncError::Archive(format!("{}: {e}", archive.display())))?;
            std::fs::create_dir_all(&dest)?;
            zip.extract(&dest)
                .map_err(|e| SyncError::Archive(format!("{}: {e}", archive.display())))?;
            Ok(())
        })
        .await
        .map_err(|e| SyncError::Archive(format!("unpack task failed: {e}")))?
    }
}
