//! jsbox Module Plumbing
//!
//! Everything both engines need to turn a specifier written in guest source
//! into module text:
//!
//! - [`resolver`]: specifier → CDN URL (pure)
//! - [`scanner`]: source → referenced specifiers (pure, heuristic)
//! - [`fetch`]: URL → module source (blocking, pluggable)

pub mod fetch;
pub mod resolver;
pub mod scanner;

pub use fetch::{FetchError, HttpFetcher, ModuleFetcher, SharedFetcher, StaticFetcher};
pub use resolver::{resolve, SpecifierResolver};
pub use scanner::{has_module_syntax, scan_imports};
