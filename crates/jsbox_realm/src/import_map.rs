//! The realm's import map
//!
//! Grows monotonically for the lifetime of an engine: a package resolved once
//! stays resolvable even after the snippet that needed it is gone. A realm is
//! built against a snapshot and never sees later growth.

use jsbox_modules::resolver::{is_bare, package_base};
use jsbox_modules::{scan_imports, SpecifierResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Specifier → URL, serialized as `{"imports": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    imports: BTreeMap<String, String>,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Add an entry unless the specifier is already mapped. Returns whether
    /// the map grew.
    pub fn insert(&mut self, specifier: impl Into<String>, url: impl Into<String>) -> bool {
        let specifier = specifier.into();
        if self.imports.contains_key(&specifier) {
            return false;
        }
        self.imports.insert(specifier, url.into());
        true
    }

    /// Map one bare specifier: the specifier itself, its package base, and
    /// the base's trailing-slash prefix for sub-path imports.
    pub fn add_specifier(&mut self, specifier: &str, resolver: &SpecifierResolver) -> bool {
        if !is_bare(specifier) {
            return false;
        }
        let mut grew = self.insert(specifier, resolver.resolve(specifier));
        if let Some(base) = package_base(specifier) {
            let url = resolver.resolve(base);
            grew |= self.insert(format!("{base}/"), format!("{url}/"));
            grew |= self.insert(base, url);
        }
        grew
    }

    /// Scan `source` and map every bare specifier it references.
    pub fn merge_from_source(&mut self, source: &str, resolver: &SpecifierResolver) -> bool {
        scan_imports(source)
            .iter()
            .fold(false, |grew, specifier| self.add_specifier(specifier, resolver) | grew)
    }

    /// Look a specifier up: exact entry first, then the longest
    /// trailing-slash prefix with the remainder appended.
    pub fn lookup(&self, specifier: &str) -> Option<String> {
        if let Some(url) = self.imports.get(specifier) {
            return Some(url.clone());
        }
        self.imports
            .iter()
            .filter(|(prefix, _)| prefix.ends_with('/') && specifier.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, url)| format!("{url}{}", &specifier[prefix.len()..]))
    }

    pub fn clear(&mut self) {
        self.imports.clear();
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{\"imports\":{}}".to_string())
    }
}
