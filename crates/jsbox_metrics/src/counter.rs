//! Engine event counts, keyed by the names in [`crate::names`]

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct Counter {
    events: BTreeMap<&'static str, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &'static str, value: usize) {
        *self.events.entry(name).or_default() += value;
    }

    pub fn get(&self, name: &str) -> usize {
        self.events.get(name).copied().unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.events.clear();
    }

    /// Every event seen so far, ordered by name
    pub fn snapshot(&self) -> Vec<(&'static str, usize)> {
        self.events.iter().map(|(name, count)| (*name, *count)).collect()
    }
}
