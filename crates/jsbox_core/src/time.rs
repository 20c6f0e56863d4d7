//! Wall-clock helpers
//!
//! Log timestamps and cache recency are expressed in milliseconds since the
//! Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Strictly increasing millisecond clock.
///
/// Two stamps issued in the same millisecond still compare in issue order.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Resume after a previously issued stamp (e.g. one read back from storage).
    pub fn starting_after(last: u64) -> Self {
        Self { last }
    }

    pub fn tick(&mut self) -> u64 {
        let now = now_millis().max(self.last.saturating_add(1));
        self.last = now;
        now
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}
