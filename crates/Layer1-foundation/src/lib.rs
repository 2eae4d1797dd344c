//! # rctl-foundation
//!
//! Foundation layer for rctl:
//! - Error: 세션/백엔드/설정 에러 (`Error`, `Result`)
//! - Config: 통합 설정 (`RctlConfig` - exec / copy 기본값)
//! - Storage: JsonStore (글로벌 + 프로젝트 설정 파일)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{CopyConfig, ExecConfig, RctlConfig, CONFIG_KEYS, RCTL_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{JsonStore, RCTL_DIR};
