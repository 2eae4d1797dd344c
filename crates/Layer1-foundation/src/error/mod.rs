//! Error types for rctl
//!
//! 세션/백엔드/설정 에러를 중앙에서 관리. Task 완료 에러(timeout, exit code,
//! worker)는 `rctl-task`의 `TaskError`가 담당한다.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// rctl 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 세션 관련
    // ========================================================================
    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Failed to spawn command: {command} - {message}")]
    Spawn { command: String, message: String },

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Spawn 에러 생성 헬퍼
    pub fn spawn(command: impl Into<String>, message: impl ToString) -> Self {
        Error::Spawn {
            command: command.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_helper() {
        let err = Error::spawn("ls -la", "no such file");
        assert_eq!(
            err.to_string(),
            "Failed to spawn command: ls -la - no such file"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "IO error: missing");
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: Error = json.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
