//! jsbox Code Cache
//!
//! Package code kept across executions, bounded by least-recent use, over a
//! pluggable key-value store.

pub mod code_cache;
pub mod store;

pub use code_cache::CodeCache;
pub use store::{CacheError, FileStore, KeyValueStore, MemoryStore};
