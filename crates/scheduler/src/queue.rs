//! Durable queue records backing the command scheduler.

use crate::error::{SchedulerError, SchedulerResult};
use satchel_db::{Database, Record};
use serde_json::Value;

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    batch   INTEGER NOT NULL,
    seq     INTEGER NOT NULL,
    command TEXT NOT NULL,
    args    TEXT NOT NULL,
    status  TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue (status, batch, seq);
"#;

/// Status of a queued command invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Executing,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Executing => "executing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> SchedulerResult<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "executing" => Ok(QueueStatus::Executing),
            "done" => Ok(QueueStatus::Done),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(SchedulerError::InvalidArgs(format!(
                "unknown queue status '{other}'"
            ))),
        }
    }
}

/// One pending command invocation.
#[derive(Clone, Debug)]
pub struct QueueRecord {
    pub id: i64,
    pub batch: i64,
    pub seq: i64,
    pub command: String,
    pub args: Vec<Value>,
    pub status: QueueStatus,
}

impl QueueRecord {
    fn from_record(record: &Record) -> SchedulerResult<Self> {
        let get_i64 = |field: &str| {
            record.get(field).and_then(Value::as_i64).ok_or_else(|| {
                SchedulerError::InvalidArgs(format!("queue record missing '{field}'"))
            })
        };
        let get_str = |field: &str| {
            record.get(field).and_then(Value::as_str).ok_or_else(|| {
                SchedulerError::InvalidArgs(format!("queue record missing '{field}'"))
            })
        };
        let args: Vec<Value> = serde_json::from_str(get_str("args")?)
            .map_err(|e| SchedulerError::InvalidArgs(format!("bad args payload: {e}")))?;
        Ok(Self {
            id: get_i64("id")?,
            batch: get_i64("batch")?,
            seq: get_i64("seq")?,
            command: get_str("command")?.to_string(),
            args,
            status: QueueStatus::parse(get_str("status")?)?,
        })
    }
}

/// The durable queue table.
#[derive(Clone)]
pub struct Queue {
    db: Database,
}

impl Queue {
    pub async fn new(db: Database) -> SchedulerResult<Self> {
        db.execute(QUEUE_SCHEMA, &[]).await?;
        Ok(Self { db })
    }

    /// Append a command at the end of the given batch.
    pub async fn append(&self, batch: i64, command: &str, args: &[Value]) -> SchedulerResult<()> {
        let args_json = Value::Array(args.to_vec()).to_string();
        self.db
            .execute(
                "INSERT INTO queue (batch, seq, command, args, status) \
                 SELECT ?, COALESCE(MAX(seq) + 1, 0), ?, ?, 'pending' \
                 FROM queue WHERE batch = ?",
                &[
                    Value::from(batch),
                    Value::from(command),
                    Value::from(args_json),
                    Value::from(batch),
                ],
            )
            .await?;
        Ok(())
    }

    /// The next pending record in (batch, seq) order.
    pub async fn next_pending(&self) -> SchedulerResult<Option<QueueRecord>> {
        let row = self
            .db
            .query_one(
                "SELECT * FROM queue WHERE status = 'pending' ORDER BY batch, seq LIMIT 1",
                &[],
            )
            .await?;
        row.as_ref().map(QueueRecord::from_record).transpose()
    }

    pub async fn mark(&self, id: i64, status: QueueStatus) -> SchedulerResult<()> {
        self.db
            .execute(
                "UPDATE queue SET status = ? WHERE id = ?",
                &[Value::from(status.as_str()), Value::from(id)],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> SchedulerResult<()> {
        self.db
            .execute("DELETE FROM queue WHERE id = ?", &[Value::from(id)])
            .await?;
        Ok(())
    }

    /// Mark a batch's remaining pending records failed.
    pub async fn fail_batch_remaining(&self, batch: i64) -> SchedulerResult<u64> {
        Ok(self
            .db
            .execute(
                "UPDATE queue SET status = 'failed' WHERE batch = ? AND status = 'pending'",
                &[Value::from(batch)],
            )
            .await?)
    }

    /// Discard all pending records.
    pub async fn purge_pending(&self) -> SchedulerResult<u64> {
        Ok(self
            .db
            .execute("DELETE FROM queue WHERE status = 'pending'", &[])
            .await?)
    }

    /// Discard a batch's pending records.
    pub async fn purge_batch(&self, batch: i64) -> SchedulerResult<u64> {
        Ok(self
            .db
            .execute(
                "DELETE FROM queue WHERE batch = ? AND status = 'pending'",
                &[Value::from(batch)],
            )
            .await?)
    }

    /// Reset records orphaned in the executing state by a crash.
    ///
    /// Commands are idempotent by contract, so re-running them from the
    /// same args is safe.
    pub async fn reset_orphans(&self) -> SchedulerResult<u64> {
        Ok(self
            .db
            .execute(
                "UPDATE queue SET status = 'pending' WHERE status = 'executing'",
                &[],
            )
            .await?)
    }

    /// The highest batch number present, or 0 for an empty queue.
    pub async fn max_batch(&self) -> SchedulerResult<i64> {
        let row = self
            .db
            .query_one("SELECT MAX(batch) AS batch FROM queue", &[])
            .await?;
        Ok(row
            .and_then(|r| r.get("batch").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    /// All queue records, in execution order. Used for diagnostics and tests.
    pub async fn records(&self) -> SchedulerResult<Vec<QueueRecord>> {
        let rows = self
            .db
            .query("SELECT * FROM queue ORDER BY batch, seq", &[])
            .await?;
        rows.iter().map(QueueRecord::from_record).collect()
    }
}
