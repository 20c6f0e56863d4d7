//! jsbox Core
//!
//! The contract shared by every execution backend:
//! - Console capture and execution results
//! - The async engine lifecycle (`initialize` / `execute` / `dispose`)
//! - Error taxonomy for host-side failures
//! - Settings for interpreter, realm, module fetching and the code cache

pub mod engine;
pub mod error;
pub mod result;
pub mod settings;
pub mod time;

pub use engine::{EngineKind, ExecutionEngine};
pub use error::EngineError;
pub use result::{ExecutionResult, LogEntry, LogLevel};
pub use settings::{
    CacheSettings, InterpreterSettings, ModuleSettings, RealmSettings, Settings, SettingsError,
    DEFAULT_CDN_ROOT,
};

/// Crate version, reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
