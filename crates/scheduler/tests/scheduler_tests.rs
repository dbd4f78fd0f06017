//! Queue ordering, batching, retention, and failure semantics.

use async_trait::async_trait;
use satchel_db::Database;
use satchel_scheduler::{
    Command, CommandItem, CommandScheduler, QueueStatus, SchedulerError, SchedulerResult,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

/// Records every invocation; optionally returns follow-ups or fails.
struct StubCommand {
    log: Arc<Mutex<Vec<String>>>,
    label: String,
    follow_ups: Vec<CommandItem>,
    fail: bool,
}

impl StubCommand {
    fn new(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            label: label.to_string(),
            follow_ups: Vec::new(),
            fail: false,
        })
    }

    fn with_follow_ups(log: &Arc<Mutex<Vec<String>>>, label: &str, items: Vec<CommandItem>) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            label: label.to_string(),
            follow_ups: items,
            fail: false,
        })
    }

    fn failing(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            label: label.to_string(),
            follow_ups: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl Command for StubCommand {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>> {
        let arg = args.first().and_then(Value::as_str).unwrap_or_default();
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{name}:{arg}", self.label));
        if self.fail {
            return Err(SchedulerError::command_failed(name, "stub failure"));
        }
        Ok(self.follow_ups.clone())
    }
}

async fn scheduler() -> CommandScheduler {
    let db = Database::in_memory().await.unwrap();
    CommandScheduler::new(db).await.unwrap()
}

#[tokio::test]
async fn test_commands_execute_in_append_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.register_command("step", StubCommand::new(&log, "s"));

    for i in 0..4 {
        sched
            .append_command("step", &[json!(format!("{i}"))])
            .await
            .unwrap();
    }
    sched.execute_queue().await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, ["s:step:0", "s:step:1", "s:step:2", "s:step:3"]);
    assert!(sched.queue().records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_follow_ups_run_in_the_same_batch() {
    // Batch 1: download then unpack; download appends cleanup on success.
    // Expected executed order: download, unpack, cleanup, all in batch 1.
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.set_delete_executed(false);
    sched.register_command(
        "download",
        StubCommand::with_follow_ups(
            &log,
            "d",
            vec![CommandItem::new("cleanup", vec![json!("/tmp/archive")])],
        ),
    );
    sched.register_command("unpack", StubCommand::new(&log, "u"));
    sched.register_command("cleanup", StubCommand::new(&log, "c"));

    sched
        .append_command("download", &[json!("http://x/a.zip")])
        .await
        .unwrap();
    sched
        .append_command("unpack", &[json!("/tmp/archive")])
        .await
        .unwrap();
    sched.execute_queue().await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries,
        [
            "d:download:http://x/a.zip",
            "u:unpack:/tmp/archive",
            "c:cleanup:/tmp/archive"
        ]
    );

    let records = sched.queue().records().await.unwrap();
    assert_eq!(records.len(), 3);
    let batch = records[0].batch;
    assert!(records.iter().all(|r| r.batch == batch));
    assert!(records.iter().all(|r| r.status == QueueStatus::Done));
}

#[tokio::test]
async fn test_failure_abandons_the_rest_of_the_batch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.set_delete_executed(false);
    sched.register_command("boom", StubCommand::failing(&log, "b"));
    sched.register_command("after", StubCommand::new(&log, "a"));

    sched.append_command("boom", &[]).await.unwrap();
    sched.append_command("after", &[]).await.unwrap();
    sched.execute_queue().await.unwrap();

    // Batch 2, enqueued after the first drain, still runs.
    sched.append_command("after", &[json!("next")]).await.unwrap();
    sched.execute_queue().await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, ["b:boom:", "a:after:next"]);

    let records = sched.queue().records().await.unwrap();
    let statuses: Vec<QueueStatus> = records.iter().map(|r| r.status).collect();
    assert!(statuses.contains(&QueueStatus::Failed));
    // The skipped record is failed, never done.
    assert_eq!(
        records
            .iter()
            .filter(|r| r.status == QueueStatus::Failed)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_delete_executed_removes_records_on_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.register_command("step", StubCommand::new(&log, "s"));
    sched.append_command("step", &[]).await.unwrap();
    sched.execute_queue().await.unwrap();
    assert!(sched.queue().records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_protocol_names_dispatch_with_prefix_stripped() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.register_protocol("blog", StubCommand::new(&log, "p"));

    sched
        .append_command("blog.refresh", &[json!("now")])
        .await
        .unwrap();
    sched.execute_queue().await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, ["p:refresh:now"]);
}

#[tokio::test]
async fn test_unknown_command_fails_at_append() {
    let sched = scheduler().await;
    let err = sched.append_command("nope", &[]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownCommand(_)));

    // A protocol name with no registered protocol is also unknown.
    let err = sched.append_command("nope.sub", &[]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownCommand(_)));
}

#[tokio::test]
async fn test_purge_discards_pending_without_executing() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.register_command("step", StubCommand::new(&log, "s"));
    sched.append_command("step", &[]).await.unwrap();
    sched.append_command("step", &[]).await.unwrap();

    assert_eq!(sched.purge_queue().await.unwrap(), 2);
    sched.execute_queue().await.unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_purge_current_batch_leaves_other_batches() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler().await;
    sched.register_command("step", StubCommand::new(&log, "s"));

    sched.append_command("step", &[json!("current")]).await.unwrap();
    assert_eq!(sched.purge_current_batch().await.unwrap(), 1);
    sched.execute_queue().await.unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_orphaned_executing_records_rerun_after_restart() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let db = Database::in_memory().await.unwrap();

    let mut sched = CommandScheduler::new(db.clone()).await.unwrap();
    sched.register_command("step", StubCommand::new(&log, "s"));
    sched.append_command("step", &[json!("orphan")]).await.unwrap();

    // Simulate a crash mid-execution: the record is stuck in 'executing'.
    let record = sched.queue().next_pending().await.unwrap().unwrap();
    sched
        .queue()
        .mark(record.id, QueueStatus::Executing)
        .await
        .unwrap();
    drop(sched);

    let mut sched = CommandScheduler::new(db).await.unwrap();
    sched.register_command("step", StubCommand::new(&log, "s"));
    sched.execute_queue().await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, ["s:step:orphan"]);
}
