//! Messages exchanged between the host and a realm thread
//!
//! Tagged the way the wire format spells them so a transcript of a session
//! can be logged or replayed as JSON.

use jsbox_core::ExecutionResult;
use serde::{Deserialize, Serialize};

/// Host → realm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    ExecuteCode { code: String },
    /// Stop the realm loop; never sent by a guest
    Shutdown,
}

/// Realm → host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RealmMessage {
    ExecutionResult { result: ExecutionResult },
    /// Sent once, after the bootstrap ran
    #[serde(rename = "iframe-ready")]
    Ready,
}
