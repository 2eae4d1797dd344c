//! Stream-execution task - a command driven by a stream reader
//!
//! The task does not run anything itself. A backend-specific reader (see
//! [`crate::executor`]) executes the command and calls back into the task,
//! which forwards lines to user callbacks, records the exit code or the
//! timeout, and completes on `on_finished`.

use crate::completion::Latch;
use crate::error::{TaskError, TaskResult};
use crate::executor::{ReaderOptions, StreamHandler, StreamReader};
use crate::registry::TaskRegistry;
use crate::task::{guard_callback, Task, TaskId, TaskKind};
use chrono::{DateTime, Utc};
use rctl_foundation::{ExecConfig, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Callback receiving one output line
pub type LineCallback = Arc<dyn Fn(&ExecTask, &str) + Send + Sync + 'static>;

/// Callback receiving a lifecycle event
pub type EventCallback = Arc<dyn Fn(&ExecTask) + Send + Sync + 'static>;

// ============================================================================
// Options
// ============================================================================

/// Command execution options
#[derive(Clone)]
pub struct ExecOptions {
    /// `None` disables the exit code check
    pub expected_exit_code: Option<i32>,
    pub timeout: Option<Duration>,
    pub output_timeout: Option<Duration>,
    /// Route stderr to the stdout callback; defaults to "no stderr callback given"
    pub combine_stderr: Option<bool>,
    on_stdout: Option<LineCallback>,
    on_stderr: Option<LineCallback>,
    on_timeout: Option<EventCallback>,
    on_finished: Option<EventCallback>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            expected_exit_code: Some(0),
            timeout: None,
            output_timeout: None,
            combine_stderr: None,
            on_stdout: None,
            on_stderr: None,
            on_timeout: None,
            on_finished: None,
        }
    }
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = Some(code);
        self
    }

    pub fn no_exit_code_check(mut self) -> Self {
        self.expected_exit_code = None;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn output_timeout(mut self, timeout: Duration) -> Self {
        self.output_timeout = Some(timeout);
        self
    }

    pub fn combine_stderr(mut self, combine: bool) -> Self {
        self.combine_stderr = Some(combine);
        self
    }

    pub fn on_stdout(mut self, f: impl Fn(&ExecTask, &str) + Send + Sync + 'static) -> Self {
        self.on_stdout = Some(Arc::new(f));
        self
    }

    pub fn on_stderr(mut self, f: impl Fn(&ExecTask, &str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Arc::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl Fn(&ExecTask) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl Fn(&ExecTask) + Send + Sync + 'static) -> Self {
        self.on_finished = Some(Arc::new(f));
        self
    }

    /// Fill unset timeouts from session defaults
    pub fn with_defaults(mut self, config: &ExecConfig) -> Self {
        if self.timeout.is_none() {
            self.timeout = config.timeout();
        }
        if self.output_timeout.is_none() {
            self.output_timeout = config.output_timeout();
        }
        self
    }

    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            timeout: self.timeout,
            output_timeout: self.output_timeout,
            combine_stderr: self.combine_stderr.unwrap_or(self.on_stderr.is_none()),
        }
    }
}

impl std::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("expected_exit_code", &self.expected_exit_code)
            .field("timeout", &self.timeout)
            .field("output_timeout", &self.output_timeout)
            .field("combine_stderr", &self.combine_stderr)
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_finished", &self.on_finished.is_some())
            .finish()
    }
}

// ============================================================================
// ExecTask
// ============================================================================

struct Callbacks {
    on_stdout: Option<LineCallback>,
    on_stderr: Option<LineCallback>,
    on_timeout: Option<EventCallback>,
    on_finished: Option<EventCallback>,
}

/// A command executed through a stream reader
pub struct ExecTask {
    id: TaskId,
    command: String,
    started_at: DateTime<Utc>,
    finished_at: OnceLock<DateTime<Utc>>,
    registry: Weak<TaskRegistry>,
    reader: OnceLock<Box<dyn StreamReader>>,
    expected_exit_code: Option<i32>,
    exit_code: OnceLock<i32>,
    timed_out: AtomicBool,
    /// Set when the finished transition starts (or start aborted)
    terminal: AtomicBool,
    aborted: AtomicBool,
    /// Thread running the finished transition
    finisher: OnceLock<ThreadId>,
    combine_stderr: bool,
    callbacks: Callbacks,
    done: Latch,
}

impl ExecTask {
    /// Register a new task and start its reader through `factory`.
    ///
    /// The task is registered before the reader exists, so it can never be
    /// observed running while absent from the registry. If `factory` fails
    /// the task is unregistered again, no callback fires and the error is
    /// returned.
    pub fn start<F>(
        registry: &Arc<TaskRegistry>,
        command: impl Into<String>,
        options: ExecOptions,
        factory: F,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce(Arc<dyn StreamHandler>, ReaderOptions) -> Result<Box<dyn StreamReader>>,
    {
        let reader_options = options.reader_options();
        let task = Arc::new(Self {
            id: TaskId::new(),
            command: command.into(),
            started_at: Utc::now(),
            finished_at: OnceLock::new(),
            registry: Arc::downgrade(registry),
            reader: OnceLock::new(),
            expected_exit_code: options.expected_exit_code,
            exit_code: OnceLock::new(),
            timed_out: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            finisher: OnceLock::new(),
            combine_stderr: reader_options.combine_stderr,
            callbacks: Callbacks {
                on_stdout: options.on_stdout,
                on_stderr: options.on_stderr,
                on_timeout: options.on_timeout,
                on_finished: options.on_finished,
            },
            done: Latch::new(),
        });

        registry.register(task.clone());

        let handler: Arc<dyn StreamHandler> = task.clone();
        match factory(handler, reader_options) {
            Ok(reader) => {
                let _ = task.reader.set(reader);
                info!("Started command {}: {}", task.id, task.command);
                Ok(task)
            }
            Err(e) => {
                warn!("Failed to start command '{}': {}", task.command, e);
                task.aborted.store(true, Ordering::SeqCst);
                task.terminal.store(true, Ordering::SeqCst);
                let _ = task.finished_at.set(Utc::now());
                registry.unregister(task.id);
                task.done.release();
                Err(e)
            }
        }
    }

    /// Command line as given
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn expected_exit_code(&self) -> Option<i32> {
        self.expected_exit_code
    }

    /// Whether stderr is routed to the stdout callback
    pub fn combine_stderr(&self) -> bool {
        self.combine_stderr
    }

    /// Reader could not be started
    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// True inside the finished callback. The reader (or recovering waiter)
    /// is parked on this thread, so joining or waiting would never return.
    fn on_finisher_thread(&self) -> bool {
        self.finisher.get() == Some(&thread::current().id())
    }

    /// Terminal transition: unregister, user callback, release waiters.
    /// Runs at most once.
    fn finish(&self) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.finisher.set(thread::current().id());
        let _ = self.finished_at.set(Utc::now());

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
        match self.error() {
            Some(error) => debug!("Command {} failed: {}", self.id, error),
            None => debug!("Command {} completed", self.id),
        }
        if let Some(callback) = &self.callbacks.on_finished {
            guard_callback(&self.command, "finished", || callback(self));
        }

        self.done.release();
    }
}

impl StreamHandler for ExecTask {
    fn on_stdout(&self, line: &str) {
        if let Some(callback) = &self.callbacks.on_stdout {
            guard_callback(&self.command, "stdout", || callback(self, line));
        }
    }

    fn on_stderr(&self, line: &str) {
        if let Some(callback) = &self.callbacks.on_stderr {
            guard_callback(&self.command, "stderr", || callback(self, line));
        }
    }

    fn on_exit(&self, code: i32) {
        if self.exit_code.set(code).is_err() {
            warn!("Command {} reported a second exit code {}", self.id, code);
        }
    }

    fn on_timeout(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
        warn!("Command {} timed out: {}", self.id, self.command);
        if let Some(callback) = &self.callbacks.on_timeout {
            guard_callback(&self.command, "timeout", || callback(self));
        }
    }

    fn on_finished(&self) {
        self.finish();
    }
}

impl Task for ExecTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Exec
    }

    fn label(&self) -> &str {
        &self.command
    }

    fn is_running(&self) -> bool {
        if self.terminal.load(Ordering::SeqCst) {
            return false;
        }
        // Still being started: no reader yet
        self.reader.get().map_or(true, |reader| reader.is_alive())
    }

    fn error(&self) -> Option<TaskError> {
        if self.is_running() {
            return None;
        }
        if self.timed_out() {
            return Some(TaskError::Timeout);
        }
        match self.expected_exit_code {
            Some(expected) => {
                let actual = self.exit_code.get().copied();
                (actual != Some(expected)).then_some(TaskError::ExitCode { expected, actual })
            }
            None => None,
        }
    }

    fn wait(&self, raise_if_error: bool) -> TaskResult<Option<i32>> {
        if !self.on_finisher_thread() {
            if let Some(reader) = self.reader.get() {
                reader.join();
                if !self.terminal.load(Ordering::SeqCst) {
                    warn!("Reader of command {} ended without finishing", self.id);
                    self.finish();
                }
            }
            self.done.wait();
        }

        if raise_if_error {
            self.raise_if_error()?;
        }
        Ok(self.exit_code())
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

    fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }
}

impl std::fmt::Debug for ExecTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecTask")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("running", &self.is_running())
            .field("exit_code", &self.exit_code())
            .field("timed_out", &self.timed_out())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rctl_foundation::Error;
    use std::sync::mpsc;
    use std::thread;

    #[derive(Debug, Clone)]
    enum Step {
        Out(&'static str),
        Err(&'static str),
        Exit(i32),
        Timeout,
        /// Block until the test sends on the gate channel
        Hold,
    }

    struct ScriptedReader {
        alive: Arc<AtomicBool>,
        done: Arc<Latch>,
    }

    impl StreamReader for ScriptedReader {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn join(&self) {
            self.done.wait();
        }
    }

    type Factory =
        Box<dyn FnOnce(Arc<dyn StreamHandler>, ReaderOptions) -> Result<Box<dyn StreamReader>>>;

    /// Reader replaying `steps` on its own thread, then finishing
    fn scripted(steps: Vec<Step>, hold: Option<mpsc::Receiver<()>>) -> Factory {
        Box::new(move |handler: Arc<dyn StreamHandler>, _options: ReaderOptions| {
            let alive = Arc::new(AtomicBool::new(true));
            let done = Arc::new(Latch::new());
            let reader = ScriptedReader {
                alive: alive.clone(),
                done: done.clone(),
            };
            thread::spawn(move || {
                for step in steps {
                    match step {
                        Step::Out(line) => handler.on_stdout(line),
                        Step::Err(line) => handler.on_stderr(line),
                        Step::Exit(code) => handler.on_exit(code),
                        Step::Timeout => handler.on_timeout(),
                        Step::Hold => {
                            if let Some(hold) = &hold {
                                let _ = hold.recv();
                            }
                        }
                    }
                }
                handler.on_finished();
                alive.store(false, Ordering::SeqCst);
                done.release();
            });
            Ok(Box::new(reader) as Box<dyn StreamReader>)
        })
    }

    fn start(steps: Vec<Step>, options: ExecOptions) -> (Arc<TaskRegistry>, Arc<ExecTask>) {
        let registry = Arc::new(TaskRegistry::new());
        let task = ExecTask::start(&registry, "demo", options, scripted(steps, None)).unwrap();
        (registry, task)
    }

    #[test]
    fn test_success() {
        let (registry, task) = start(vec![Step::Out("hi"), Step::Exit(0)], ExecOptions::new());
        assert_eq!(task.wait(true).unwrap(), Some(0));
        assert!(task.error().is_none());
        assert!(!task.is_running());
        assert!(registry.is_empty());
        assert_eq!(task.kind(), TaskKind::Exec);
    }

    #[test]
    fn test_exit_code_mismatch() {
        let (_registry, task) = start(vec![Step::Exit(2)], ExecOptions::new());

        assert_eq!(task.wait(false).unwrap(), Some(2));
        let err = task.wait(true).unwrap_err();
        assert!(matches!(
            err,
            TaskError::ExitCode {
                expected: 0,
                actual: Some(2)
            }
        ));
        assert_eq!(task.state(), crate::TaskState::Failed);
    }

    #[test]
    fn test_exit_code_never_captured() {
        let (_registry, task) = start(vec![], ExecOptions::new().expect_exit_code(3));
        let err = task.wait(true).unwrap_err();
        assert!(matches!(
            err,
            TaskError::ExitCode {
                expected: 3,
                actual: None
            }
        ));
    }

    #[test]
    fn test_no_exit_code_check() {
        let (_registry, task) = start(vec![Step::Exit(5)], ExecOptions::new().no_exit_code_check());
        assert_eq!(task.wait(true).unwrap(), Some(5));
        assert!(task.error().is_none());
    }

    #[test]
    fn test_timeout_has_priority() {
        let (_registry, task) = start(vec![Step::Exit(1), Step::Timeout], ExecOptions::new());
        let err = task.wait(true).unwrap_err();
        assert!(err.is_timeout());
        assert!(task.timed_out());
        assert_eq!(task.state(), crate::TaskState::TimedOut);
    }

    #[test]
    fn test_error_none_while_running() {
        let registry = Arc::new(TaskRegistry::new());
        let (tx, rx) = mpsc::channel();
        let task = ExecTask::start(
            &registry,
            "held",
            ExecOptions::new(),
            scripted(vec![Step::Timeout, Step::Hold], Some(rx)),
        )
        .unwrap();

        // timed-out flag may already be set; error still waits for finish
        assert!(!task.wait_timeout(Duration::from_millis(30)));
        assert!(task.is_running());
        assert!(task.error().is_none());
        assert!(registry.contains(task.id()));

        tx.send(()).unwrap();
        assert!(task.wait(true).unwrap_err().is_timeout());
        assert!(!registry.contains(task.id()));
    }

    #[test]
    fn test_callback_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (e1, e2, e3, e4) = (
            events.clone(),
            events.clone(),
            events.clone(),
            events.clone(),
        );
        let options = ExecOptions::new()
            .on_stdout(move |_, line| e1.lock().push(format!("out:{}", line)))
            .on_stderr(move |_, line| e2.lock().push(format!("err:{}", line)))
            .on_timeout(move |_| e3.lock().push("timeout".to_string()))
            .on_finished(move |task| {
                // terminal state is visible to the callback
                assert!(!task.is_running());
                assert!(task.error().is_some_and(|e| e.is_timeout()));
                e4.lock().push("finished".to_string());
            });

        let (_registry, task) = start(
            vec![Step::Out("a"), Step::Err("b"), Step::Out("c"), Step::Timeout],
            options,
        );
        task.wait(false).unwrap();
        task.wait(false).unwrap();

        assert_eq!(
            *events.lock(),
            vec!["out:a", "err:b", "out:c", "timeout", "finished"]
        );
    }

    #[test]
    fn test_combine_stderr_default() {
        assert!(ExecOptions::new().reader_options().combine_stderr);
        assert!(
            !ExecOptions::new()
                .on_stderr(|_, _| {})
                .reader_options()
                .combine_stderr
        );
        assert!(
            ExecOptions::new()
                .on_stderr(|_, _| {})
                .combine_stderr(true)
                .reader_options()
                .combine_stderr
        );
    }

    #[test]
    fn test_with_defaults_keeps_explicit_values() {
        let config = ExecConfig {
            timeout_secs: Some(10.0),
            output_timeout_secs: Some(2.0),
            ..Default::default()
        };
        let options = ExecOptions::new()
            .timeout(Duration::from_secs(1))
            .with_defaults(&config);
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
        assert_eq!(options.output_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_factory_failure_aborts() {
        let registry = Arc::new(TaskRegistry::new());
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let result = ExecTask::start(
            &registry,
            "broken",
            ExecOptions::new().on_finished(move |_| flag.store(true, Ordering::SeqCst)),
            |_, _| Err(Error::spawn("broken", "no such shell")),
        );

        assert!(matches!(result, Err(Error::Spawn { .. })));
        assert!(registry.is_empty());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let options = ExecOptions::new()
            .on_stdout(|_, _| panic!("bad line handler"))
            .on_finished(|_| panic!("bad finished handler"));
        let (registry, task) = start(vec![Step::Out("x"), Step::Exit(0)], options);

        assert_eq!(task.wait(true).unwrap(), Some(0));
        assert!(!task.is_running());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_inside_finished_callback() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let options = ExecOptions::new().on_finished(move |task| {
            let result = task.wait(false).map_err(|e| e.to_string());
            let _ = tx.lock().send((result, task.wait_timeout(Duration::from_secs(5))));
        });
        let (registry, task) = start(vec![Step::Exit(0)], options);

        let (result, finished) = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(result, Ok(Some(0)));
        assert!(finished);

        // other waiters are released once the callback returns
        assert!(task.wait_timeout(Duration::from_secs(3)));
        assert_eq!(task.wait(true).unwrap(), Some(0));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_recovers_from_reader_without_finish() {
        struct DeadReader;
        impl StreamReader for DeadReader {
            fn is_alive(&self) -> bool {
                false
            }
            fn join(&self) {}
        }

        let registry = Arc::new(TaskRegistry::new());
        let task = ExecTask::start(&registry, "dead", ExecOptions::new(), |_, _| {
            Ok(Box::new(DeadReader) as Box<dyn StreamReader>)
        })
        .unwrap();

        assert!(!task.is_running());
        assert!(task.wait(false).unwrap().is_none());
        assert!(registry.is_empty());
    }
}
