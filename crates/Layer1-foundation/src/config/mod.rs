//! Config - 통합 설정 관리
//!
//! - `rctl.rs` - RctlConfig 통합 설정 (exec / copy 기본값)

mod rctl;

pub use rctl::{CopyConfig, ExecConfig, RctlConfig, CONFIG_KEYS, RCTL_CONFIG_FILE};
