//! Durable command queue and scheduler for satchel.
//!
//! Commands are persisted to a queue table and executed in FIFO batches on
//! a single sequential execution context. A command may return follow-up
//! commands, which join its batch and run before the batch completes.

pub mod command;
pub mod error;
pub mod queue;
pub mod scheduler;

pub use command::{Command, CommandItem, parse_args};
pub use error::{SchedulerError, SchedulerResult};
pub use queue::{Queue, QueueRecord, QueueStatus};
pub use scheduler::CommandScheduler;
