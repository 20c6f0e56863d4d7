//! The execution contract implemented by every backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{EngineError, ExecutionResult};

/// Which backend runs the guest code
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Fresh, resource-bounded QuickJS runtime per call
    #[default]
    Interpreter,
    /// Long-lived isolated realm with a growing import map
    Realm,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Interpreter => f.write_str("interpreter"),
            EngineKind::Realm => f.write_str("realm"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interpreter" => Ok(EngineKind::Interpreter),
            "realm" => Ok(EngineKind::Realm),
            other => Err(format!("unknown engine '{other}' (expected 'interpreter' or 'realm')")),
        }
    }
}

/// Uniform lifecycle shared by both engines.
///
/// Callers drive one engine from a single task; `&mut self` keeps at most one
/// `execute` in flight per instance.
#[async_trait]
pub trait ExecutionEngine: Send {
    fn kind(&self) -> EngineKind;

    /// Prepare the substrate. Calling it again on a ready engine is a no-op.
    async fn initialize(&mut self) -> Result<(), EngineError>;

    /// True iff `initialize` succeeded and `dispose` has not been called since.
    fn is_ready(&self) -> bool;

    /// Run guest source. Guest failures are reported through
    /// [`ExecutionResult::error`], never as `Err`.
    async fn execute(&mut self, source: &str) -> Result<ExecutionResult, EngineError>;

    /// Release substrate resources. Idempotent.
    async fn dispose(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_parses_its_display_form() {
        for kind in [EngineKind::Interpreter, EngineKind::Realm] {
            assert_eq!(kind.to_string().parse::<EngineKind>().unwrap(), kind);
        }
        assert!("v8".parse::<EngineKind>().is_err());
    }
}
