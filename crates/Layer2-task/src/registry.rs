//! Task Registry - the set of active tasks owned by one session
//!
//! Every operation takes the same lock, held only while the list is mutated
//! or copied. Tasks remove themselves from their own completion path, so a
//! snapshot may briefly contain a task that has already finished.

use crate::task::{Task, TaskId, TaskInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Thread-safe, ordered set of active tasks
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<Vec<Arc<dyn Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the active set
    pub fn register(&self, task: Arc<dyn Task>) {
        debug!("Registering task {} ({})", task.id(), task.label());
        self.tasks.lock().push(task);
    }

    /// Remove a task if present. Absence is not an error.
    pub fn unregister(&self, id: TaskId) -> bool {
        let removed = {
            let mut tasks = self.tasks.lock();
            match tasks.iter().position(|task| task.id() == id) {
                Some(index) => {
                    tasks.remove(index);
                    true
                }
                None => false,
            }
        };

        if removed {
            debug!("Unregistered task {}", id);
        }
        removed
    }

    /// Point-in-time copy of the active tasks
    pub fn snapshot(&self) -> Vec<Arc<dyn Task>> {
        self.tasks.lock().clone()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.lock().iter().any(|task| task.id() == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Status of every active task, queried outside the lock
    pub fn infos(&self) -> Vec<TaskInfo> {
        self.snapshot().iter().map(|task| task.info()).collect()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("active", &self.len())
            .finish()
    }
}
