//! jsbox Metrics - execution counters and timings
//!
//! Zero-cost instrumentation for the execution engines: everything here
//! vanishes unless the `metrics` feature is enabled.
//!
//! # Usage
//!
//! ```ignore
//! use jsbox_metrics::{Counter, ExecutionTimer};
//!
//! let mut timer = ExecutionTimer::new(32); // Track last 32 executions
//! timer.begin();
//! // ... run guest code ...
//! timer.end();
//! println!("avg: {:.2}ms", timer.average_ms());
//! ```

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod execution_timer;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use execution_timer::ExecutionTimer;

/// Counter names shared by both engines
pub mod names {
    pub const EXECUTIONS: &str = "executions";
    pub const GUEST_ERRORS: &str = "guest_errors";
    pub const MODULE_FETCHES: &str = "module_fetches";
    pub const REALM_REBUILDS: &str = "realm_rebuilds";
    pub const PROTOCOL_TIMEOUTS: &str = "protocol_timeouts";
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct ExecutionTimer;

#[cfg(not(feature = "metrics"))]
impl ExecutionTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self) {}
    pub fn record(&mut self, _elapsed: std::time::Duration) {}
    pub fn samples(&self) -> usize { 0 }
    pub fn average_ms(&self) -> f64 { 0.0 }
    pub fn range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: usize) {}
    pub fn get(&self, _name: &str) -> usize { 0 }
    pub fn reset_all(&mut self) {}
    pub fn snapshot(&self) -> Vec<(&'static str, usize)> { Vec::new() }
}
