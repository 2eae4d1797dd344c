//! Background-thread task - runs a callable on its own dedicated thread
//!
//! The thread is started inside the constructor, so the task is running as
//! soon as it exists. Whatever the callable returns or panics with is stored
//! in a write-once slot before the finished callback fires; nothing is ever
//! propagated into the caller's thread until it asks for it.
//!
//! Worker threads are detached: they never keep the process alive at exit,
//! and there is no cancellation once started.

use crate::completion::Latch;
use crate::error::{TaskError, TaskResult};
use crate::registry::TaskRegistry;
use crate::task::{guard_callback, panic_message, Task, TaskId, TaskKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rctl_foundation::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Invoked exactly once from the worker thread, success or failure
pub type ThreadFinishedCallback = Box<dyn FnOnce(&ThreadTask) + Send + 'static>;

/// A task ran in a background thread
pub struct ThreadTask {
    id: TaskId,
    label: String,
    started_at: DateTime<Utc>,
    finished_at: OnceLock<DateTime<Utc>>,
    error: OnceLock<TaskError>,
    done: Latch,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Worker thread, set once the callable has returned
    finisher: OnceLock<ThreadId>,
}

impl ThreadTask {
    /// Start `f` on a new thread and return immediately
    pub fn spawn<F>(
        label: impl Into<String>,
        f: F,
        on_finished: Option<ThreadFinishedCallback>,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::start(None, label.into(), f, on_finished)
    }

    /// Like [`ThreadTask::spawn`], registering the task in `registry` before
    /// the thread starts and unregistering it right before `on_finished`.
    pub fn spawn_in<F>(
        registry: &Arc<TaskRegistry>,
        label: impl Into<String>,
        f: F,
        on_finished: Option<ThreadFinishedCallback>,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::start(Some(registry), label.into(), f, on_finished)
    }

    fn start<F>(
        registry: Option<&Arc<TaskRegistry>>,
        label: String,
        f: F,
        on_finished: Option<ThreadFinishedCallback>,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let task = Arc::new(Self {
            id: TaskId::new(),
            label,
            started_at: Utc::now(),
            finished_at: OnceLock::new(),
            error: OnceLock::new(),
            done: Latch::new(),
            handle: Mutex::new(None),
            finisher: OnceLock::new(),
        });

        let registry = registry.map(Arc::downgrade);
        if let Some(registry) = registry.as_ref().and_then(Weak::upgrade) {
            registry.register(task.clone());
        }

        let worker = Arc::clone(&task);
        let worker_registry = registry.clone();
        let spawned = thread::Builder::new()
            .name(format!("rctl-task-{}", task.id))
            .spawn(move || worker.run(f, worker_registry, on_finished));

        match spawned {
            Ok(handle) => {
                *task.handle.lock() = Some(handle);
                info!("Started task {}: {}", task.id, task.label);
                Ok(task)
            }
            Err(e) => {
                if let Some(registry) = registry.as_ref().and_then(Weak::upgrade) {
                    registry.unregister(task.id);
                }
                let _ = task.error.set(TaskError::worker(anyhow::anyhow!(
                    "failed to spawn worker thread: {}",
                    e
                )));
                let _ = task.finished_at.set(Utc::now());
                task.done.release();
                Err(Error::Io(e))
            }
        }
    }

    fn run<F>(
        self: Arc<Self>,
        f: F,
        registry: Option<Weak<TaskRegistry>>,
        on_finished: Option<ThreadFinishedCallback>,
    ) where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let failure = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(anyhow::anyhow!(
                "task '{}' panicked: {}",
                self.label,
                panic_message(payload.as_ref())
            )),
        };

        match failure {
            Some(error) => {
                debug!("Task {} failed: {:#}", self.id, error);
                let _ = self.error.set(TaskError::worker(error));
            }
            None => debug!("Task {} completed", self.id),
        }
        let _ = self.finished_at.set(Utc::now());
        let _ = self.finisher.set(thread::current().id());

        if let Some(registry) = registry.and_then(|weak| weak.upgrade()) {
            registry.unregister(self.id);
        }
        if let Some(callback) = on_finished {
            guard_callback(&self.label, "finished", || callback(&*self));
        }

        self.done.release();
    }

    /// True inside the finished callback, where the worker cannot wait on itself
    fn on_finisher_thread(&self) -> bool {
        self.finisher.get() == Some(&thread::current().id())
    }
}

impl Task for ThreadTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Thread
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn is_running(&self) -> bool {
        !self.done.is_released()
    }

    fn error(&self) -> Option<TaskError> {
        self.error.get().cloned()
    }

    fn wait(&self, raise_if_error: bool) -> TaskResult<Option<i32>> {
        if !self.on_finisher_thread() {
            self.done.wait();

            // First waiter reaps the thread; it is already past its last statement.
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }

        if raise_if_error {
            self.raise_if_error()?;
        }
        Ok(None)
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        self.on_finisher_thread() || self.done.wait_timeout(timeout)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at.get().copied()
    }
}

impl std::fmt::Debug for ThreadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTask")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("running", &self.is_running())
            .finish()
    }
}
