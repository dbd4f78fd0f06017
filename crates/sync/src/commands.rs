//! Built-in commands registered with the scheduler.

use crate::archive::ArchiveUnpacker;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use async_trait::async_trait;
use satchel_scheduler::{Command, CommandItem, SchedulerError, SchedulerResult, parse_args};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn required_str<'a>(args: &'a Map<String, Value>, field: &str) -> SchedulerResult<&'a str> {
    args.get(field).and_then(Value::as_str).ok_or_else(|| {
        SchedulerError::InvalidArgs(format!("missing '{field}' argument"))
    })
}

/// Fetches a URL and writes the result to a file.
///
/// Arguments: `<url> <filename>`. Transient failures are retried up to
/// `max_retries` attempts, subject to a requests-per-minute window; the
/// command then fails permanently. Re-running after a crash re-downloads to
/// the same filename, so the command is idempotent.
pub struct GetUrlCommand {
    http: Arc<dyn HttpClient>,
    max_retries: u32,
    max_requests_per_minute: f64,
    request_window: Mutex<Vec<Instant>>,
}

impl GetUrlCommand {
    pub fn new(http: Arc<dyn HttpClient>, max_retries: u32, max_requests_per_minute: f64) -> Self {
        Self {
            http,
            max_retries,
            max_requests_per_minute,
            request_window: Mutex::new(Vec::new()),
        }
    }

    /// Time to wait before the next request is allowed under the rate
    /// limit, recording the request slot.
    fn reserve_request_slot(&self) -> Duration {
        if self.max_requests_per_minute <= 0.0 {
            return Duration::ZERO;
        }
        let window = Duration::from_secs(60);
        let max = self.max_requests_per_minute.ceil() as usize;
        let now = Instant::now();
        let mut slots = self.request_window.lock().expect("request window poisoned");
        slots.retain(|t| now.duration_since(*t) < window);
        let wait = if slots.len() >= max {
            (slots[0] + window).saturating_duration_since(now)
        } else {
            Duration::ZERO
        };
        slots.push(now + wait);
        wait
    }

    pub(crate) async fn fetch(&self, url: &str, dest: &Path) -> SyncResult<()> {
        let mut last_error = SyncError::Network(format!("no attempts made for {url}"));
        for attempt in 1..=self.max_retries.max(1) {
            let wait = self.reserve_request_slot();
            if !wait.is_zero() {
                tracing::debug!(url, ?wait, "rate limit reached; delaying request");
                tokio::time::sleep(wait).await;
            }
            match self.http.get_file(url, &[], None, dest).await {
                Ok(response) if response.is_success() => return Ok(()),
                Ok(response) if response.is_transient_failure() => {
                    last_error =
                        SyncError::Network(format!("{url} returned status {}", response.status));
                }
                Ok(response) => {
                    // Client errors are permanent; retrying cannot help.
                    return Err(SyncError::Network(format!(
                        "{url} returned status {}",
                        response.status
                    )));
                }
                Err(e @ SyncError::Network(_)) => last_error = e,
                Err(e) => return Err(e),
            }
            tracing::warn!(url, attempt, error = %last_error, "download attempt failed");
        }
        Err(SyncError::Network(format!(
            "{last_error} (after {} attempts)",
            self.max_retries.max(1)
        )))
    }
}

#[async_trait]
impl Command for GetUrlCommand {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>> {
        let args = parse_args(args, &["url", "filename"], &Map::new())?;
        let url = required_str(&args, "url")?;
        let filename = required_str(&args, "filename")?;
        self.fetch(url, Path::new(filename))
            .await
            .map_err(|e| SchedulerError::command_failed(name, e))?;
        Ok(Vec::new())
    }
}

/// Downloads a zip archive and unpacks it to the filesystem.
///
/// Arguments: `<url> <path>`. The command downloads the archive next to the
/// destination, then chains `unzip` and `rm` follow-ups so the unpack and
/// cleanup run as later steps of the same batch.
pub struct DownloadZipCommand {
    http: Arc<dyn HttpClient>,
}

impl DownloadZipCommand {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Command for DownloadZipCommand {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>> {
        let args = parse_args(args, &["url", "path"], &Map::new())?;
        let url = required_str(&args, "url")?;
        let dest = PathBuf::from(required_str(&args, "path")?);

        let archive = archive_path(&dest);
        let response = self
            .http
            .get_file(url, &[], None, &archive)
            .await
            .map_err(|e| SchedulerError::command_failed(name, e))?;
        if !response.is_success() {
            return Err(SchedulerError::command_failed(
                name,
                format!("{url} returned status {}", response.status),
            ));
        }

        Ok(vec![
            CommandItem::new(
                "unzip",
                vec![json!(archive.to_string_lossy()), json!(dest.to_string_lossy())],
            ),
            CommandItem::new("rm", vec![json!(archive.to_string_lossy())]),
        ])
    }
}

/// Temporary archive location next to the destination. The suffix is
/// appended to the whole file name, so destinations differing only in
/// extension do not collide.
fn archive_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".download.zip");
    dest.with_file_name(name)
}

/// Unpacks an archive. Arguments: `<archive> <dest>`.
pub struct UnzipCommand {
    unpacker: Arc<dyn ArchiveUnpacker>,
}

impl UnzipCommand {
    pub fn new(unpacker: Arc<dyn ArchiveUnpacker>) -> Self {
        Self { unpacker }
    }
}

#[async_trait]
impl Command for UnzipCommand {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>> {
        let args = parse_args(args, &["archive", "dest"], &Map::new())?;
        let archive = PathBuf::from(required_str(&args, "archive")?);
        let dest = PathBuf::from(required_str(&args, "dest")?);
        self.unpacker
            .unpack(&archive, &dest)
            .await
            .map_err(|e| SchedulerError::command_failed(name, e))?;
        Ok(Vec::new())
    }
}

/// Removes a file or directory. Arguments: `<path>`. A missing path is not
/// an error, so the command can safely re-run.
pub struct RemoveFileCommand;

#[async_trait]
impl Command for RemoveFileCommand {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>> {
        let args = parse_args(args, &["path"], &Map::new())?;
        let path = PathBuf::from(required_str(&args, "path")?);
        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(SchedulerError::command_failed(name, e)),
        }
    }
}
