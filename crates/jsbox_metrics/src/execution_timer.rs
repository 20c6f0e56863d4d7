//! Wall time spent per guest execution, over a sliding window

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ExecutionTimer {
    started: Option<Instant>,
    window: VecDeque<Duration>,
    capacity: usize,
}

impl ExecutionTimer {
    /// Keep the last `capacity` executions (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            started: None,
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Record the time since `begin`. Unpaired calls are ignored.
    pub fn end(&mut self) {
        if let Some(started) = self.started.take() {
            self.record(started.elapsed());
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    pub fn average_ms(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let total: Duration = self.window.iter().sum();
        millis(total) / self.window.len() as f64
    }

    /// Fastest and slowest execution in the window
    pub fn range_ms(&self) -> (f64, f64) {
        let min = self.window.iter().min().copied().unwrap_or_default();
        let max = self.window.iter().max().copied().unwrap_or_default();
        (millis(min), millis(max))
    }
}

impl Default for ExecutionTimer {
    fn default() -> Self {
        Self::new(32)
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
