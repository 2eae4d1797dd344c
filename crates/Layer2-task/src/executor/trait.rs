//! Stream reader contract
//!
//! A stream reader drives one command: it delivers output lines and terminal
//! events to a [`StreamHandler`] and reports its own liveness. Backends
//! implement [`StreamReader`]; `ExecTask` implements [`StreamHandler`].

use std::time::Duration;

/// Receives events from a stream reader.
///
/// Line events may fire any number of times, in order per stream. Exactly
/// one of `on_exit`/`on_timeout` (or neither, if the process vanished without
/// a code) precedes a single `on_finished`; no line event follows it.
pub trait StreamHandler: Send + Sync {
    fn on_stdout(&self, line: &str);

    fn on_stderr(&self, line: &str);

    /// The process terminated and reported `code`
    fn on_exit(&self, code: i32);

    /// The reader gave up on the command and killed it
    fn on_timeout(&self);

    /// Last event; the reader delivers nothing afterwards
    fn on_finished(&self);
}

/// Handle on a running stream reader
pub trait StreamReader: Send + Sync {
    /// False once `on_finished` has been delivered
    fn is_alive(&self) -> bool;

    /// Block until the reader has delivered `on_finished`.
    /// Safe to call from several threads and more than once.
    fn join(&self);
}

/// Per-command reader settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Overall time budget, unset = unlimited
    pub timeout: Option<Duration>,

    /// Maximum silence between two lines, unset = unlimited
    pub output_timeout: Option<Duration>,

    /// Route stderr lines to `on_stdout`
    pub combine_stderr: bool,
}
