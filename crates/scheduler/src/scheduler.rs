//! The command scheduler: sequences and executes queued commands.
//!
//! Execution runs under an exclusive lock, so exactly one command is in
//! flight per scheduler instance. That removes interleaved store writes
//! during a refresh cycle without command-level locking.

use crate::command::{Command, CommandItem};
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{Queue, QueueStatus};
use satchel_db::Database;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

enum Registered {
    /// A plain named command.
    Plain(Arc<dyn Command>),
    /// A protocol: sub-commands addressed as `prefix.sub`.
    Protocol(Arc<dyn Command>),
}

/// A durable FIFO command scheduler.
pub struct CommandScheduler {
    queue: Queue,
    commands: HashMap<String, Registered>,
    current_batch: AtomicI64,
    delete_executed: bool,
    exec_lock: Mutex<()>,
}

impl CommandScheduler {
    /// Open the scheduler over a queue database.
    ///
    /// Records orphaned in the executing state by a previous crash are
    /// reset to pending and will re-run on the next drain.
    pub async fn new(db: Database) -> SchedulerResult<Self> {
        let queue = Queue::new(db).await?;
        let orphans = queue.reset_orphans().await?;
        if orphans > 0 {
            tracing::warn!(orphans, "re-queued commands orphaned by a previous run");
        }
        let current_batch = queue.max_batch().await? + 1;
        Ok(Self {
            queue,
            commands: HashMap::new(),
            current_batch: AtomicI64::new(current_batch),
            delete_executed: true,
            exec_lock: Mutex::new(()),
        })
    }

    /// Whether executed records are deleted (default) or kept with a
    /// terminal status for diagnosing scheduler behavior.
    pub fn set_delete_executed(&mut self, delete: bool) {
        self.delete_executed = delete;
    }

    /// Register a plain command under a name.
    pub fn register_command(&mut self, name: impl Into<String>, command: Arc<dyn Command>) {
        self.commands.insert(name.into(), Registered::Plain(command));
    }

    /// Register a protocol; its sub-commands are addressed as `prefix.sub`.
    pub fn register_protocol(&mut self, prefix: impl Into<String>, protocol: Arc<dyn Command>) {
        self.commands
            .insert(prefix.into(), Registered::Protocol(protocol));
    }

    /// Access the underlying queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Append a command to the end of the current batch.
    ///
    /// The record is made durable before this returns; execution happens
    /// on the next [`CommandScheduler::execute_queue`] drain.
    pub async fn append_command(&self, name: &str, args: &[Value]) -> SchedulerResult<()> {
        // Fail unknown names at append time rather than mid-drain.
        self.resolve(name)?;
        let batch = self.current_batch.load(Ordering::SeqCst);
        self.queue.append(batch, name, args).await?;
        tracing::debug!(command = name, batch, "appended command");
        Ok(())
    }

    /// Execute all commands currently on the queue, strictly in
    /// (batch, seq) order.
    ///
    /// Follow-up commands returned by an executing command are appended to
    /// the same batch and run before the batch completes. A failing command
    /// abandons the rest of its batch; execution continues with the next
    /// batch.
    pub async fn execute_queue(&self) -> SchedulerResult<()> {
        let _guard = self.exec_lock.lock().await;

        while let Some(record) = self.queue.next_pending().await? {
            self.queue.mark(record.id, QueueStatus::Executing).await?;
            let result = match self.resolve(&record.command) {
                Ok((command, sub_name)) => command.execute(&sub_name, &record.args).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(follow_ups) => {
                    for CommandItem { name, args } in follow_ups {
                        self.queue.append(record.batch, &name, &args).await?;
                    }
                    if self.delete_executed {
                        self.queue.delete(record.id).await?;
                    } else {
                        self.queue.mark(record.id, QueueStatus::Done).await?;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        command = %record.command,
                        batch = record.batch,
                        seq = record.seq,
                        error = %e,
                        "command failed; abandoning remainder of batch"
                    );
                    self.queue.mark(record.id, QueueStatus::Failed).await?;
                    self.queue.fail_batch_remaining(record.batch).await?;
                }
            }
        }

        self.current_batch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Discard all pending records without executing them.
    pub async fn purge_queue(&self) -> SchedulerResult<u64> {
        self.queue.purge_pending().await
    }

    /// Discard the current batch's pending records.
    pub async fn purge_current_batch(&self) -> SchedulerResult<u64> {
        self.queue
            .purge_batch(self.current_batch.load(Ordering::SeqCst))
            .await
    }

    /// Resolve a command name to its implementation.
    ///
    /// A dot-qualified name dispatches to the registered protocol with the
    /// prefix stripped; a plain name dispatches directly.
    fn resolve(&self, name: &str) -> SchedulerResult<(Arc<dyn Command>, String)> {
        if let Some((prefix, sub_name)) = name.split_once('.') {
            match self.commands.get(prefix) {
                Some(Registered::Protocol(protocol)) => {
                    Ok((protocol.clone(), sub_name.to_string()))
                }
                _ => Err(SchedulerError::UnknownCommand(name.to_string())),
            }
        } else {
            match self.commands.get(name) {
                Some(Registered::Plain(command)) => Ok((command.clone(), name.to_string())),
                _ => Err(SchedulerError::UnknownCommand(name.to_string())),
            }
        }
    }
}

/// Convenience constructor: open a scheduler on a queue database file.
pub async fn open(path: impl AsRef<std::path::Path>) -> SchedulerResult<CommandScheduler> {
    let db = Database::open(path).await?;
    CommandScheduler::new(db).await
}
