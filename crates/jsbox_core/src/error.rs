use std::time::Duration;
use thiserror::Error;

/// Host-side failures of an execution engine.
///
/// Guest failures (throws, syntax errors, interrupts, memory faults, module
/// load failures) are not represented here; they land in
/// [`ExecutionResult::error`](crate::ExecutionResult::error).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine failed to initialize: {0}")]
    Initialization(String),

    #[error("engine is not ready; call initialize() first")]
    NotReady,

    #[error("realm did not respond within {0:?}")]
    ProtocolTimeout(Duration),

    #[error("realm closed its channel before responding")]
    RealmClosed,

    #[error("execution task crashed: {0}")]
    Crashed(String),
}

impl EngineError {
    /// Whether the failing engine instance should be disposed and
    /// re-initialized before further use.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ProtocolTimeout(_) | EngineError::RealmClosed | EngineError::Crashed(_)
        )
    }
}
