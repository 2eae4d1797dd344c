//! Rctl Config - 통합 설정
//!
//! Defaults applied by sessions to commands and file copies.
//! Every field is optional in the file; an absent field falls through to the
//! next layer (defaults < global < project).

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const RCTL_CONFIG_FILE: &str = "config.json";

/// Keys accepted by [`RctlConfig::set`] / [`RctlConfig::unset`]
pub const CONFIG_KEYS: &[&str] = &[
    "exec.timeoutSecs",
    "exec.outputTimeoutSecs",
    "exec.pollIntervalMs",
    "exec.drainTimeoutMs",
    "exec.shell",
    "copy.chunkSize",
];

// ============================================================================
// Rctl Config (통합)
// ============================================================================

/// rctl 통합 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RctlConfig {
    /// 버전 (마이그레이션용)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Command execution defaults
    #[serde(default)]
    pub exec: ExecConfig,

    /// File copy defaults
    #[serde(default)]
    pub copy: CopyConfig,
}

impl RctlConfig {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Self::default()
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<RctlConfig>(RCTL_CONFIG_FILE)? {
                debug!("Loaded global config from {}", global.base_dir().display());
                config.merge(global_config);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<RctlConfig>(RCTL_CONFIG_FILE)?
            {
                debug!("Loaded project config from {}", project.base_dir().display());
                config.merge(project_config);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a single store, falling back to defaults when absent
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        let config = store
            .load_optional::<RctlConfig>(RCTL_CONFIG_FILE)?
            .unwrap_or_else(Self::new);
        config.validate()?;
        Ok(config)
    }

    /// 다른 설정과 병합 (other에 있는 값이 우선)
    pub fn merge(&mut self, other: RctlConfig) {
        self.exec.merge(other.exec);
        self.copy.merge(other.copy);
    }

    /// Reject values no session could use
    pub fn validate(&self) -> Result<()> {
        check_secs("exec.timeoutSecs", self.exec.timeout_secs)?;
        check_secs("exec.outputTimeoutSecs", self.exec.output_timeout_secs)?;
        if self.copy.chunk_size == Some(0) {
            return Err(Error::Config("copy.chunkSize must be positive".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Edit by key
    // ========================================================================

    /// Set one value by its dotted JSON key, e.g. `exec.timeoutSecs`.
    /// `self` is left untouched when the value is rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key {
            "exec.timeoutSecs" => next.exec.timeout_secs = Some(parse_value(key, value)?),
            "exec.outputTimeoutSecs" => {
                next.exec.output_timeout_secs = Some(parse_value(key, value)?)
            }
            "exec.pollIntervalMs" => next.exec.poll_interval_ms = Some(parse_value(key, value)?),
            "exec.drainTimeoutMs" => next.exec.drain_timeout_ms = Some(parse_value(key, value)?),
            "exec.shell" => next.exec.shell = Some(value.to_string()),
            "copy.chunkSize" => next.copy.chunk_size = Some(parse_value(key, value)?),
            _ => return Err(unknown_key(key)),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Clear one value so the next layer (or the default) applies
    pub fn unset(&mut self, key: &str) -> Result<()> {
        match key {
            "exec.timeoutSecs" => self.exec.timeout_secs = None,
            "exec.outputTimeoutSecs" => self.exec.output_timeout_secs = None,
            "exec.pollIntervalMs" => self.exec.poll_interval_ms = None,
            "exec.drainTimeoutMs" => self.exec.drain_timeout_ms = None,
            "exec.shell" => self.exec.shell = None,
            "copy.chunkSize" => self.copy.chunk_size = None,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.exec.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_output_timeout(mut self, timeout: Duration) -> Self {
        self.exec.output_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.copy.chunk_size = Some(chunk_size);
        self
    }
}

// ============================================================================
// Exec Config
// ============================================================================

/// Command execution defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// Overall command timeout, unset = no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,

    /// Maximum silence between two output lines, unset = no limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_timeout_secs: Option<f64>,

    /// Exit/timeout polling interval of the stream reader (20ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    /// How long to wait for output pipes to drain after the process ended (2s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,

    /// Shell used to run commands (`sh` / `cmd` when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

impl ExecConfig {
    fn merge(&mut self, other: ExecConfig) {
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.output_timeout_secs.is_some() {
            self.output_timeout_secs = other.output_timeout_secs;
        }
        if other.poll_interval_ms.is_some() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.drain_timeout_ms.is_some() {
            self.drain_timeout_ms = other.drain_timeout_ms;
        }
        if other.shell.is_some() {
            self.shell = other.shell;
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.and_then(secs_to_duration)
    }

    pub fn output_timeout(&self) -> Option<Duration> {
        self.output_timeout_secs.and_then(secs_to_duration)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms.unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS))
    }
}

// ============================================================================
// Copy Config
// ============================================================================

/// File copy defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyConfig {
    /// Bytes read/written per chunk (16 KiB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

impl CopyConfig {
    fn merge(&mut self, other: CopyConfig) {
        if other.chunk_size.is_some() {
            self.chunk_size = other.chunk_size;
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }
}

// ============================================================================
// Helpers
// ============================================================================

const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2000;
const DEFAULT_CHUNK_SIZE: usize = 16384;

fn default_version() -> u32 {
    1
}

/// Only reached for validated values
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn check_secs(key: &str, secs: Option<f64>) -> Result<()> {
    match secs {
        Some(secs) if Duration::try_from_secs_f64(secs).is_err() => Err(Error::Config(format!(
            "{} must be a non-negative number of seconds, got {}",
            key, secs
        ))),
        _ => Ok(()),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value '{}' for {}: {}", value, key, e)))
}

fn unknown_key(key: &str) -> Error {
    Error::Config(format!(
        "Unknown config key '{}' (expected one of: {})",
        key,
        CONFIG_KEYS.join(", ")
    ))
}
