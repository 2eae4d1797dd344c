//! Session - a handle on one machine (local or remote) that runs tasks
//!
//! A session owns a backend and the registry of its active tasks. It is a
//! cheap `Clone` handle; all clones share the same backend, registry and
//! closed flag.
//!
//! ## Backends
//! - `LocalBackend` - host filesystem and processes

mod local;
mod manager;

pub use local::LocalBackend;
pub use manager::SessionManager;

use crate::exec::{ExecOptions, ExecTask};
use crate::executor::{ReaderOptions, StreamHandler, StreamReader};
use crate::fs;
use crate::registry::TaskRegistry;
use crate::task::Task;
use crate::thread::ThreadTask;
use rctl_foundation::{Error, RctlConfig, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Backend contract
// ============================================================================

/// How a session file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate
    Write,
    /// Create or append
    Append,
}

/// File-like object returned by [`Session::open`]
pub trait SessionFile: Read + Write + Send {}

impl<T: Read + Write + Send> SessionFile for T {}

/// Machine-specific operations behind a session
pub trait SessionBackend: Send + Sync {
    /// Backend name ("local", ...)
    fn kind(&self) -> &'static str;

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SessionFile>>;

    fn exists(&self, path: &Path) -> Result<bool>;

    fn is_dir(&self, path: &Path) -> Result<bool>;

    /// Create a directory and its missing parents
    fn mkdir(&self, path: &Path) -> Result<()>;

    /// Entry names of a directory, sorted
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Start executing `command`, reporting to `handler`
    fn spawn_reader(
        &self,
        command: &str,
        handler: Arc<dyn StreamHandler>,
        options: ReaderOptions,
    ) -> Result<Box<dyn StreamReader>>;

    /// Release backend resources
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

struct SessionInner {
    name: String,
    backend: Box<dyn SessionBackend>,
    registry: Arc<TaskRegistry>,
    config: RctlConfig,
    closed: AtomicBool,
}

/// Handle on one machine
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(name: impl Into<String>, backend: impl SessionBackend + 'static) -> Self {
        Self::with_config(name, backend, RctlConfig::new())
    }

    pub fn with_config(
        name: impl Into<String>,
        backend: impl SessionBackend + 'static,
        config: RctlConfig,
    ) -> Self {
        let name = name.into();
        info!("Opened {} session '{}'", backend.kind(), name);
        Self {
            inner: Arc::new(SessionInner {
                name,
                backend: Box::new(backend),
                registry: Arc::new(TaskRegistry::new()),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Session on the local machine with default settings
    pub fn local() -> Self {
        Self::local_with_config(&RctlConfig::new())
    }

    pub fn local_with_config(config: &RctlConfig) -> Self {
        Self::with_config(
            "local",
            LocalBackend::with_config((&config.exec).into()),
            config.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &'static str {
        self.inner.backend.kind()
    }

    pub fn config(&self) -> &RctlConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.inner.registry
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed(self.inner.name.clone()));
        }
        Ok(())
    }

    // ========================================================================
    // Filesystem
    // ========================================================================

    pub fn open(&self, path: impl AsRef<Path>, mode: OpenMode) -> Result<Box<dyn SessionFile>> {
        self.ensure_open()?;
        self.inner.backend.open(path.as_ref(), mode)
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.ensure_open()?;
        self.inner.backend.exists(path.as_ref())
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.ensure_open()?;
        self.inner.backend.is_dir(path.as_ref())
    }

    pub fn mkdir(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        self.inner.backend.mkdir(path.as_ref())
    }

    pub fn list_dir(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.inner.backend.list_dir(path.as_ref())
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Start `command` and return its live task without blocking
    pub fn execute(&self, command: &str, options: ExecOptions) -> Result<Arc<ExecTask>> {
        self.ensure_open()?;
        let options = options.with_defaults(&self.inner.config.exec);
        let backend = &self.inner.backend;

        ExecTask::start(&self.inner.registry, command, options, |handler, reader_options| {
            backend.spawn_reader(command, handler, reader_options)
        })
    }

    /// Copy one file from this session to `dest_session` in the background
    pub fn copy_file(
        &self,
        src: impl AsRef<Path>,
        dest_session: &Session,
        dest: impl AsRef<Path>,
        chunk_size: usize,
    ) -> Result<Arc<ThreadTask>> {
        self.start_copy(src.as_ref(), dest_session, dest.as_ref(), chunk_size, false)
    }

    /// Copy a directory tree from this session to `dest_session` in the background
    pub fn copy_dir(
        &self,
        src: impl AsRef<Path>,
        dest_session: &Session,
        dest: impl AsRef<Path>,
        chunk_size: usize,
    ) -> Result<Arc<ThreadTask>> {
        self.start_copy(src.as_ref(), dest_session, dest.as_ref(), chunk_size, true)
    }

    fn start_copy(
        &self,
        src: &Path,
        dest_session: &Session,
        dest: &Path,
        chunk_size: usize,
        recursive: bool,
    ) -> Result<Arc<ThreadTask>> {
        self.ensure_open()?;
        dest_session.ensure_open()?;
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be positive".into()));
        }

        let label = format!(
            "copy {}:{} -> {}:{}",
            self.name(),
            src.display(),
            dest_session.name(),
            dest.display()
        );
        let source = self.clone();
        let target = dest_session.clone();
        let (src, dest): (PathBuf, PathBuf) = (src.into(), dest.into());

        ThreadTask::spawn_in(
            &self.inner.registry,
            label,
            move || {
                let copied = if recursive {
                    fs::copy_dir(&source, &src, &target, &dest, chunk_size)?
                } else {
                    fs::copy_file(&source, &src, &target, &dest, chunk_size)?
                };
                debug!("Copied {} bytes to {}", copied, dest.display());
                Ok(())
            },
            None,
        )
    }

    /// Point-in-time copy of the active tasks
    pub fn tasks(&self) -> Vec<Arc<dyn Task>> {
        self.inner.registry.snapshot()
    }

    /// Close the session. In-flight tasks are neither cancelled nor awaited.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(
            "Closing session '{}' ({} active tasks)",
            self.inner.name,
            self.inner.registry.len()
        );
        self.inner.backend.close()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.name)
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .field("tasks", &self.inner.registry.len())
            .finish()
    }
}
