//! JSON 파일 저장소

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory name used for both the global and project stores
pub const RCTL_DIR: &str = "rctl";

/// JSON 설정 저장소
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 글로벌 설정 (~/.config/rctl/)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join(RCTL_DIR);
        Ok(Self::new(dir))
    }

    /// 프로젝트 설정 (.rctl/)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(format!(".{}", RCTL_DIR)))
    }

    /// 현재 디렉토리 프로젝트 설정
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            Error::Config(format!(
                "Failed to create {}: {}",
                self.base_dir.display(),
                e
            ))
        })
    }

    /// JSON 로드 (Optional) - 없는 파일은 `None`, 깨진 파일은 에러
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// JSON 저장. 임시 파일에 쓴 뒤 rename 하므로 읽는 쪽은 반쯤 쓰인 파일을 보지 않는다.
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let tmp = self.file_path(&format!(".{}.tmp", filename));

        let content = serde_json::to_string_pretty(data)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// 파일 삭제. 없던 파일이면 `false`
    pub fn remove(&self, filename: &str) -> Result<bool> {
        match std::fs::remove_file(self.file_path(filename)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("nested"));

        let sample = Sample {
            name: "local".to_string(),
            count: 3,
        };
        store.save("sample.json", &sample).unwrap();
        assert!(store.exists("sample.json"));

        let loaded: Option<Sample> = store.load_optional("sample.json").unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn test_load_optional_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let loaded: Option<Sample> = store.load_optional("absent.json").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = JsonStore::new(dir.path());

        let result: Result<Option<Sample>> = store.load_optional("bad.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_save_overwrites_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        for count in 1..=2 {
            let sample = Sample {
                name: "again".to_string(),
                count,
            };
            store.save("sample.json", &sample).unwrap();
        }
        let loaded: Option<Sample> = store.load_optional("sample.json").unwrap();
        assert_eq!(loaded.map(|s| s.count), Some(2));
        assert!(!dir.path().join(".sample.json.tmp").exists());

        assert!(store.remove("sample.json").unwrap());
        assert!(!store.remove("sample.json").unwrap());
        assert!(!store.exists("sample.json"));
    }

    #[test]
    fn test_project_dir() {
        let store = JsonStore::project("/tmp/work");
        assert_eq!(store.base_dir(), Path::new("/tmp/work/.rctl"));
    }
}
