//! File copy between sessions
//!
//! Both routines block; `Session::copy_file` / `Session::copy_dir` run them
//! on a `ThreadTask`.

use crate::session::{OpenMode, Session};
use rctl_foundation::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use tracing::debug;

/// Copy `src` on `src_session` to `dest` on `dest_session` in `chunk_size`
/// chunks. Returns the number of bytes copied.
pub fn copy_file(
    src_session: &Session,
    src: &Path,
    dest_session: &Session,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".into()));
    }

    let mut reader = src_session.open(src, OpenMode::Read)?;
    let mut writer = dest_session.open(dest, OpenMode::Write)?;

    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;

    debug!("Copied {} -> {} ({} bytes)", src.display(), dest.display(), total);
    Ok(total)
}

/// Mirror the tree under `src` into `dest`, creating directories as needed.
/// Returns the number of file bytes copied.
pub fn copy_dir(
    src_session: &Session,
    src: &Path,
    dest_session: &Session,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".into()));
    }
    if !src_session.is_dir(src)? {
        return Err(Error::InvalidInput(format!(
            "not a directory: {}",
            src.display()
        )));
    }

    dest_session.mkdir(dest)?;
    let mut total = 0;
    for name in src_session.list_dir(src)? {
        let from = src.join(&name);
        let to = dest.join(&name);
        total += if src_session.is_dir(&from)? {
            copy_dir(src_session, &from, dest_session, &to, chunk_size)?
        } else {
            copy_file(src_session, &from, dest_session, &to, chunk_size)?
        };
    }
    Ok(total)
}
