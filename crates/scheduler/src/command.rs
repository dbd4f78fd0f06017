//! The command capability executed by the scheduler.

use crate::error::{SchedulerError, SchedulerResult};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A command invocation: a name plus its ordered arguments.
///
/// Commands return follow-up items instead of suspending on callbacks; the
/// scheduler appends them to the executing batch before advancing.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandItem {
    pub name: String,
    pub args: Vec<Value>,
}

impl CommandItem {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// A unit of work registered with the scheduler.
///
/// Plain commands ignore `name`; protocol instances receive the sub-command
/// name with the protocol prefix already stripped. Commands must be
/// idempotent and re-runnable from the same args, since a record orphaned by
/// a crash is re-executed on the next drain.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, name: &str, args: &[Value]) -> SchedulerResult<Vec<CommandItem>>;
}

/// Parse a command argument list into name/value pairs.
///
/// Arguments are taken by position in `arg_order`, or by named switches
/// (`-name value`). Missing names fall back to `defaults`.
pub fn parse_args(
    args: &[Value],
    arg_order: &[&str],
    defaults: &Map<String, Value>,
) -> SchedulerResult<Map<String, Value>> {
    let mut parsed = defaults.clone();
    let mut position = 0;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(switch) = arg.as_str().and_then(|s| s.strip_prefix('-')) {
            let value = iter.next().ok_or_else(|| {
                SchedulerError::InvalidArgs(format!("switch '-{switch}' has no value"))
            })?;
            parsed.insert(switch.to_string(), value.clone());
        } else {
            let name = arg_order.get(position).ok_or_else(|| {
                SchedulerError::InvalidArgs(format!("unexpected positional argument {arg}"))
            })?;
            parsed.insert(name.to_string(), arg.clone());
            position += 1;
        }
    }
    Ok(parsed)
}
