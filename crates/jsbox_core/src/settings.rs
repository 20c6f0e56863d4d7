//! Settings management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default CDN that serves ES modules for bare package specifiers
pub const DEFAULT_CDN_ROOT: &str = "https://esm.sh";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level settings, one section per subsystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub interpreter: InterpreterSettings,
    pub realm: RealmSettings,
    pub modules: ModuleSettings,
    pub cache: CacheSettings,
}

impl Settings {
    /// Parse settings from JSON. Missing sections and fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }
}

/// Resource ceilings for the per-call interpreter runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterSettings {
    /// Heap ceiling in bytes
    pub memory_limit: usize,
    /// Native stack ceiling in bytes
    pub max_stack_size: usize,
    /// Interrupt-callback invocations allowed before the guest is aborted
    pub interrupt_budget: u64,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            memory_limit: 640 * 1024,
            max_stack_size: 320 * 1024,
            interrupt_budget: 1024,
        }
    }
}

/// Protocol bounds and resource ceilings for the isolated realm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealmSettings {
    pub response_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub memory_limit: usize,
    pub max_stack_size: usize,
}

impl RealmSettings {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for RealmSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
            ready_timeout_ms: 3_000,
            memory_limit: 64 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
        }
    }
}

/// Where and how module source is fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    pub cdn_root: String,
    pub fetch_timeout_ms: u64,
    /// Largest module body accepted, in bytes
    pub max_module_size: u64,
}

impl ModuleSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            cdn_root: DEFAULT_CDN_ROOT.to_string(),
            fetch_timeout_ms: 15_000,
            max_module_size: 8 * 1024 * 1024,
        }
    }
}

/// Code cache bounds and storage layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 100,
            key_prefix: "jsbox-code".to_string(),
        }
    }
}
