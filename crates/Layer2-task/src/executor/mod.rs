//! Command stream readers
//!
//! - `StreamReader` / `StreamHandler` - contract between a reader and its task
//! - `ProcessStreamReader` - local child process with line streaming and timeouts

pub mod local;
pub mod r#trait;

pub use local::{ProcessReaderConfig, ProcessStreamReader};
pub use r#trait::{ReaderOptions, StreamHandler, StreamReader};
