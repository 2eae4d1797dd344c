//! Local process stream reader - runs a command on the host and tails its output
//!
//! Features:
//! - Line streaming of stdout/stderr (one thread per pipe)
//! - Exit detection by polling
//! - Overall and output-idle timeouts
//! - Process group kill on timeout (Unix)
//!
//! Events reach the handler through a gate: line callbacks are serialized and
//! none is delivered once the gate has been closed before the terminal events.

use crate::completion::Latch;
use crate::executor::{ReaderOptions, StreamHandler, StreamReader};
use parking_lot::Mutex;
use rctl_foundation::{Error, ExecConfig, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Process reader configuration
#[derive(Debug, Clone)]
pub struct ProcessReaderConfig {
    /// Shell used to run commands (`sh` / `cmd` when unset)
    pub shell: Option<String>,
    /// How often the monitor checks for exit and timeouts
    pub poll_interval: Duration,
    /// Grace period for pipes to reach EOF after the process ended
    pub drain_timeout: Duration,
}

impl Default for ProcessReaderConfig {
    fn default() -> Self {
        Self::from(&ExecConfig::default())
    }
}

impl From<&ExecConfig> for ProcessReaderConfig {
    fn from(config: &ExecConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            poll_interval: config.poll_interval(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// State shared by the pipe threads and the monitor
struct Shared {
    handler: Arc<dyn StreamHandler>,
    combine_stderr: bool,
    /// `false` once terminal events are about to be delivered
    gate: Mutex<bool>,
    last_output: Mutex<Instant>,
}

impl Shared {
    fn dispatch(&self, pipe: Pipe, line: &str) {
        *self.last_output.lock() = Instant::now();

        let open = self.gate.lock();
        if !*open {
            return;
        }
        match pipe {
            Pipe::Stdout => self.handler.on_stdout(line),
            Pipe::Stderr if self.combine_stderr => self.handler.on_stdout(line),
            Pipe::Stderr => self.handler.on_stderr(line),
        }
    }

    fn close_gate(&self) {
        *self.gate.lock() = false;
    }
}

/// Stream reader over a local child process
pub struct ProcessStreamReader {
    pid: u32,
    alive: Arc<AtomicBool>,
    done: Arc<Latch>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessStreamReader {
    /// Start `command` through the shell and begin streaming its output
    pub fn spawn(
        command: &str,
        handler: Arc<dyn StreamHandler>,
        options: ReaderOptions,
        config: &ProcessReaderConfig,
    ) -> Result<Self> {
        let mut child = shell_command(command, config.shell.as_deref())
            .spawn()
            .map_err(|e| Error::spawn(command, e))?;
        let pid = child.id();
        debug!("Spawned process {} for: {}", pid, command);

        let shared = Arc::new(Shared {
            handler,
            combine_stderr: options.combine_stderr,
            gate: Mutex::new(true),
            last_output: Mutex::new(Instant::now()),
        });

        let mut pipes = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            match spawn_pipe(pid, Pipe::Stdout, stdout, Arc::clone(&shared)) {
                Ok(handle) => pipes.push(handle),
                Err(e) => return Err(abort(&mut child, &shared, e)),
            }
        }
        if let Some(stderr) = child.stderr.take() {
            match spawn_pipe(pid, Pipe::Stderr, stderr, Arc::clone(&shared)) {
                Ok(handle) => pipes.push(handle),
                Err(e) => return Err(abort(&mut child, &shared, e)),
            }
        }

        let alive = Arc::new(AtomicBool::new(true));
        let done = Arc::new(Latch::new());
        let monitor = Monitor {
            child,
            pid,
            pipes,
            shared: Arc::clone(&shared),
            options,
            poll_interval: config.poll_interval,
            drain_timeout: config.drain_timeout,
            alive: Arc::clone(&alive),
            done: Arc::clone(&done),
        };

        let handle = thread::Builder::new()
            .name(format!("rctl-reader-{}", pid))
            .spawn(move || monitor.run())
            .map_err(|e| {
                // The child went down with the closure; only its pid is left.
                shared.close_gate();
                kill_process_group(pid);
                Error::Io(e)
            })?;

        Ok(Self {
            pid,
            alive,
            done,
            monitor: Mutex::new(Some(handle)),
        })
    }

    /// OS process id of the shell running the command
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl StreamReader for ProcessStreamReader {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn join(&self) {
        self.done.wait();
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ProcessStreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStreamReader")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ============================================================================
// Monitor
// ============================================================================

struct Monitor {
    child: Child,
    pid: u32,
    pipes: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    options: ReaderOptions,
    poll_interval: Duration,
    drain_timeout: Duration,
    alive: Arc<AtomicBool>,
    done: Arc<Latch>,
}

impl Monitor {
    fn run(mut self) {
        let started = Instant::now();
        let mut timed_out = false;

        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to poll process {}: {}", self.pid, e);
                    break self.child.wait().ok();
                }
            }

            if let Some(reason) = self.expired(started) {
                warn!("Process {} timed out ({}), killing", self.pid, reason);
                timed_out = true;
                break self.kill();
            }

            thread::sleep(self.poll_interval);
        };

        self.drain();
        self.shared.close_gate();

        let handler = &self.shared.handler;
        if timed_out {
            handler.on_timeout();
        } else if let Some(code) = status.and_then(|status| status.code()) {
            handler.on_exit(code);
        } else {
            debug!("Process {} terminated without an exit code", self.pid);
        }
        handler.on_finished();

        self.alive.store(false, Ordering::SeqCst);
        self.done.release();
        debug!("Reader for process {} finished", self.pid);
    }

    fn expired(&self, started: Instant) -> Option<&'static str> {
        let now = Instant::now();
        if let Some(timeout) = self.options.timeout {
            if now.duration_since(started) >= timeout {
                return Some("overall timeout");
            }
        }
        if let Some(timeout) = self.options.output_timeout {
            let last = *self.shared.last_output.lock();
            if now.duration_since(last) >= timeout {
                return Some("no output");
            }
        }
        None
    }

    fn kill(&mut self) -> Option<ExitStatus> {
        if !kill_process_group(self.pid) {
            if let Err(e) = self.child.kill() {
                warn!("Failed to kill process {}: {}", self.pid, e);
            }
        }
        self.child.wait().ok()
    }

    /// Wait for the pipe threads to hit EOF, bounded by the drain timeout
    fn drain(&mut self) {
        let deadline = Instant::now() + self.drain_timeout;
        for pipe in self.pipes.drain(..) {
            while !pipe.is_finished() && Instant::now() < deadline {
                thread::sleep(self.poll_interval.min(Duration::from_millis(10)));
            }
            if pipe.is_finished() {
                let _ = pipe.join();
            } else {
                warn!(
                    "Output of process {} still open after {:?}, detaching",
                    self.pid, self.drain_timeout
                );
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn shell_command(command: &str, shell: Option<&str>) -> Command {
    let (default_shell, shell_arg) = if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    let mut cmd = Command::new(shell.unwrap_or(default_shell));
    cmd.arg(shell_arg)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd
}

fn spawn_pipe<R>(
    pid: u32,
    pipe: Pipe,
    source: R,
    shared: Arc<Shared>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let name = match pipe {
        Pipe::Stdout => format!("rctl-stdout-{}", pid),
        Pipe::Stderr => format!("rctl-stderr-{}", pid),
    };

    thread::Builder::new().name(name).spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(trim_line_ending(&buf));
                    shared.dispatch(pipe, &line);
                }
                Err(e) => {
                    debug!("Read error on {:?} of process {}: {}", pipe, pid, e);
                    break;
                }
            }
        }
    })
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Tear down a half-started reader
fn abort(child: &mut Child, shared: &Shared, error: std::io::Error) -> Error {
    shared.close_gate();
    if !kill_process_group(child.id()) {
        let _ = child.kill();
    }
    let _ = child.wait();
    Error::Io(error)
}

/// SIGKILL the whole process group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) -> bool {
    let Ok(pgid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(-pgid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) -> bool {
    false
}
