//! jsbox Realm Engine
//!
//! An isolated realm per import map generation, driven over a typed message
//! protocol, plus the factory that picks an engine by [`EngineKind`].
//!
//! ## Architecture
//!
//! - **Import map:** grows monotonically; any growth rebuilds the realm
//! - **Protocol:** `execute-code` / `execution-result` / `iframe-ready`
//! - **Realm:** QuickJS runtime on its own OS thread with a kill switch; a
//!   new context for every execution

pub mod engine;
pub mod import_map;
pub mod protocol;
pub mod realm;

pub use engine::RealmEngine;
pub use import_map::ImportMap;
pub use protocol::{HostMessage, RealmMessage};

use jsbox_core::{EngineKind, ExecutionEngine, Settings};
use jsbox_modules::SharedFetcher;
use jsbox_script::InterpreterEngine;

/// Build an uninitialized engine of the requested kind.
pub fn create_engine(kind: EngineKind, settings: &Settings) -> Box<dyn ExecutionEngine> {
    match kind {
        EngineKind::Interpreter => Box::new(InterpreterEngine::new(settings)),
        EngineKind::Realm => Box::new(RealmEngine::new(settings)),
    }
}

/// Like [`create_engine`], with module source served by `fetcher`.
pub fn create_engine_with_fetcher(
    kind: EngineKind,
    settings: &Settings,
    fetcher: SharedFetcher,
) -> Box<dyn ExecutionEngine> {
    match kind {
        EngineKind::Interpreter => Box::new(InterpreterEngine::new(settings).with_fetcher(fetcher)),
        EngineKind::Realm => Box::new(RealmEngine::new(settings).with_fetcher(fetcher)),
    }
}
