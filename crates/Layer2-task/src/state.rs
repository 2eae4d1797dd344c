//! Task state - derived view over a task's liveness and terminal error

use crate::error::TaskError;
use serde::{Deserialize, Serialize};

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Worker thread or stream reader still alive
    Running,

    /// Finished without error
    Succeeded,

    /// Finished with an exit-code mismatch or a worker error
    Failed,

    /// Finished because a timeout fired
    TimedOut,
}

impl TaskState {
    /// Derive the state from what the task reports
    pub fn from_outcome(running: bool, error: Option<&TaskError>) -> Self {
        if running {
            return TaskState::Running;
        }
        match error {
            None => TaskState::Succeeded,
            Some(TaskError::Timeout) => TaskState::TimedOut,
            Some(_) => TaskState::Failed,
        }
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Succeeded)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Running => "Running",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::TimedOut => "TimedOut",
        }
    }

    /// Get a symbol for the state (for CLI output)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Running => "⟳",
            TaskState::Succeeded => "✓",
            TaskState::Failed => "✗",
            TaskState::TimedOut => "⏱",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_outcome() {
        assert_eq!(TaskState::from_outcome(true, None), TaskState::Running);
        // A running task never reports its error
        assert_eq!(
            TaskState::from_outcome(true, Some(&TaskError::Timeout)),
            TaskState::Running
        );
        assert_eq!(TaskState::from_outcome(false, None), TaskState::Succeeded);
        assert_eq!(
            TaskState::from_outcome(false, Some(&TaskError::Timeout)),
            TaskState::TimedOut
        );
        let mismatch = TaskError::ExitCode {
            expected: 0,
            actual: Some(2),
        };
        assert_eq!(
            TaskState::from_outcome(false, Some(&mismatch)),
            TaskState::Failed
        );
    }

    #[test]
    fn test_terminal() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Succeeded.is_success());
        assert!(!TaskState::Failed.is_success());
        assert_eq!(TaskState::TimedOut.to_string(), "TimedOut");
    }
}
