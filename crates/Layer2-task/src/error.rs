//! Task completion errors
//!
//! Captured on the worker side and surfaced only through `Task::error`,
//! `Task::raise_if_error` and `Task::wait(true)`.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use thiserror::Error;

/// Result of waiting on a task
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Terminal error of a task
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The command did not complete within its time budget
    #[error("timeout")]
    Timeout,

    /// The process terminated with an unexpected exit code
    #[error("bad exit code: got {}, expected {expected}", display_code(*actual))]
    ExitCode {
        expected: i32,
        /// `None` when the process never reported a code
        actual: Option<i32>,
    },

    /// Error returned (or panic raised) by a background worker, kept as-is
    #[error("{0}")]
    Worker(Arc<anyhow::Error>),
}

impl TaskError {
    pub fn worker(error: anyhow::Error) -> Self {
        TaskError::Worker(Arc::new(error))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout)
    }

    /// Actual exit code carried by an exit-code mismatch
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TaskError::ExitCode { actual, .. } => *actual,
            _ => None,
        }
    }

    /// The original worker error
    pub fn as_worker(&self) -> Option<&anyhow::Error> {
        match self {
            TaskError::Worker(error) => Some(error.as_ref()),
            _ => None,
        }
    }

    /// Recover the original worker error type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.as_worker().and_then(|error| error.downcast_ref::<E>())
    }
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}
