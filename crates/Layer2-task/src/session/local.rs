//! Local backend - host filesystem and child processes

use super::{OpenMode, SessionBackend, SessionFile};
use crate::executor::{
    ProcessReaderConfig, ProcessStreamReader, ReaderOptions, StreamHandler, StreamReader,
};
use rctl_foundation::Result;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

/// Backend operating on the machine running this process
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    reader: ProcessReaderConfig,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(reader: ProcessReaderConfig) -> Self {
        Self { reader }
    }
}

impl SessionBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn SessionFile>> {
        let file = match mode {
            OpenMode::Read => File::open(path)?,
            OpenMode::Write => File::create(path)?,
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
        };
        Ok(Box::new(file))
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.try_exists()?)
    }

    fn is_dir(&self, path: &Path) -> Result<bool> {
        Ok(path.is_dir())
    }

    fn mkdir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn spawn_reader(
        &self,
        command: &str,
        handler: Arc<dyn StreamHandler>,
        options: ReaderOptions,
    ) -> Result<Box<dyn StreamReader>> {
        let reader = ProcessStreamReader::spawn(command, handler, options, &self.reader)?;
        Ok(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_open_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let backend = LocalBackend::new();

        backend
            .open(&path, OpenMode::Write)
            .unwrap()
            .write_all(b"one\n")
            .unwrap();
        backend
            .open(&path, OpenMode::Append)
            .unwrap()
            .write_all(b"two\n")
            .unwrap();

        let mut content = String::new();
        backend
            .open(&path, OpenMode::Read)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[test]
    fn test_directory_ops() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let nested = dir.path().join("a/b");

        assert!(!backend.exists(&nested).unwrap());
        backend.mkdir(&nested).unwrap();
        assert!(backend.is_dir(&nested).unwrap());

        File::create(dir.path().join("z.txt")).unwrap();
        assert_eq!(backend.list_dir(dir.path()).unwrap(), vec!["a", "z.txt"]);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalBackend::new().open(&dir.path().join("missing"), OpenMode::Read);
        assert!(matches!(result, Err(rctl_foundation::Error::Io(_))));
    }
}
