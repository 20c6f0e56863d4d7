//! Execution results and captured console output

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::time::now_millis;

/// Console method that produced a log entry
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Error,
    Warn,
    Info,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [LogLevel::Log, LogLevel::Error, LogLevel::Warn, LogLevel::Info];

    /// Name of the matching `console` method.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown console method '{s}'"))
    }
}

/// One console call made by guest code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl LogEntry {
    pub fn new(level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            level,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Outcome of one `execute()` call.
///
/// `return_value` and `error` are never both set. Both absent means the guest
/// completed with `undefined` and did not throw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ExecutionResult {
    /// Guest finished without throwing. `None` is an `undefined` completion.
    pub fn completed(logs: Vec<LogEntry>, return_value: Option<String>) -> Self {
        Self {
            logs,
            return_value,
            error: None,
        }
    }

    /// Guest threw, or the sandbox aborted it.
    pub fn failed(logs: Vec<LogEntry>, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error.push_str("Error");
        }
        Self {
            logs,
            return_value: None,
            error: Some(error),
        }
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn return_value(&self) -> Option<&str> {
        self.return_value.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_logs(self) -> Vec<LogEntry> {
        self.logs
    }

    /// Restore the exclusivity of `return_value` and `error` on a value that
    /// arrived from outside (e.g. deserialized from the wire).
    pub fn normalized(mut self) -> Self {
        if self.error.is_some() {
            self.return_value = None;
        }
        self
    }
}
