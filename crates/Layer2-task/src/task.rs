//! Task contract and shared task types

use crate::error::{TaskError, TaskResult};
use crate::state::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::watch;
use tracing::error;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Which realization backs a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Arbitrary callable on a dedicated thread
    Thread,
    /// Command driven by a stream reader
    Exec,
}

/// A unit of asynchronous work with a terminal error and a blocking wait.
///
/// Once `is_running()` returns false the outcome is fixed: `error()` and
/// `wait()` return the same thing on every later call, from any thread.
pub trait Task: Send + Sync {
    fn id(&self) -> TaskId;

    fn kind(&self) -> TaskKind;

    /// Human readable label (command line, copy description, ...)
    fn label(&self) -> &str;

    /// Non-blocking liveness of the underlying thread/reader
    fn is_running(&self) -> bool;

    /// `None` while running or on clean success
    fn error(&self) -> Option<TaskError>;

    /// Surface `error()` to the caller
    fn raise_if_error(&self) -> TaskResult<()> {
        match self.error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Block until the task is finished, then optionally raise its error.
    ///
    /// Returns the exit code for command tasks, `None` otherwise.
    fn wait(&self, raise_if_error: bool) -> TaskResult<Option<i32>>;

    /// Block for at most `timeout`. Returns whether the task finished.
    fn wait_timeout(&self, timeout: Duration) -> bool;

    /// Receiver flipping to `true` once the task finished
    fn subscribe(&self) -> watch::Receiver<bool>;

    fn started_at(&self) -> DateTime<Utc>;

    fn finished_at(&self) -> Option<DateTime<Utc>>;

    fn exit_code(&self) -> Option<i32> {
        None
    }

    fn state(&self) -> TaskState {
        let running = self.is_running();
        TaskState::from_outcome(running, self.error().as_ref())
    }

    /// Serializable point-in-time view
    fn info(&self) -> TaskInfo {
        let error = self.error();
        let state = TaskState::from_outcome(self.is_running(), error.as_ref());
        TaskInfo {
            id: self.id(),
            kind: self.kind(),
            label: self.label().to_string(),
            state,
            started_at: self.started_at(),
            finished_at: self.finished_at(),
            exit_code: self.exit_code(),
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Snapshot of a task for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    pub label: String,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl TaskInfo {
    /// Get execution duration so far
    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

/// Run a user callback, logging instead of unwinding into the worker
pub(crate) fn guard_callback(label: &str, event: &str, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            "{} callback of task '{}' panicked: {}",
            event,
            label,
            panic_message(payload.as_ref())
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
