//! # rctl-task
//!
//! Asynchronous task lifecycle for rctl sessions.
//! Commands and file transfers run in the background with uniform
//! completion, timeout and error-reporting semantics on every backend.
//!
//! ## Features
//!
//! - `Task` contract: non-blocking status, blocking/async wait, typed errors
//! - `ThreadTask` - arbitrary callable on a dedicated thread
//! - `ExecTask` - command driven by a stream reader, with line callbacks
//! - Per-session task registry
//! - Sessions over pluggable backends (local shipped)
//! - **Overall and output-idle timeouts**
//! - **File and directory copy between sessions**

pub mod completion;
pub mod error;
pub mod exec;
pub mod executor;
pub mod fs;
pub mod registry;
pub mod session;
pub mod state;
pub mod task;
pub mod thread;

// Task system
pub use completion::{wait_async, Latch};
pub use error::{TaskError, TaskResult};
pub use exec::{EventCallback, ExecOptions, ExecTask, LineCallback};
pub use registry::TaskRegistry;
pub use state::TaskState;
pub use task::{Task, TaskId, TaskInfo, TaskKind};
pub use thread::{ThreadFinishedCallback, ThreadTask};

// Readers
pub use executor::{
    ProcessReaderConfig, ProcessStreamReader, ReaderOptions, StreamHandler, StreamReader,
};

// Sessions
pub use session::{LocalBackend, OpenMode, Session, SessionBackend, SessionFile, SessionManager};
