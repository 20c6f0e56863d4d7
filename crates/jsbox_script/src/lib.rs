//! jsbox Scripting System
//!
//! Sandboxed JavaScript execution on QuickJS.
//!
//! ## Architecture
//!
//! - **Runtime:** one bounded QuickJS runtime per execution (heap ceiling,
//!   native stack ceiling, interrupt budget)
//! - **Console:** host functions that copy every argument out of the VM as text
//! - **Modules:** a loader that resolves through the CDN resolver and fetches
//!   through a pluggable [`ModuleFetcher`](jsbox_modules::ModuleFetcher)
//! - **Errors:** thrown values normalized into [`GuestError`]
//! - **Heap:** a metered allocator; the budget is enforced between bytecode
//!   loop iterations, well before QuickJS's own limit
//!
//! The building blocks (`runtime`, `console`, `marshal`, `loader`,
//! `guest_error`, `rejection`) are shared with the realm engine.

pub mod console;
pub mod engine;
pub mod evaluate;
pub mod guest_error;
pub mod heap;
pub mod loader;
pub mod marshal;
pub mod rejection;
pub mod runtime;

pub use engine::InterpreterEngine;
pub use guest_error::GuestError;
pub use heap::{HeapMeter, OUT_OF_MEMORY_MESSAGE};
pub use rejection::RejectionLog;
pub use runtime::{RuntimeLimits, SandboxRuntime};

pub use rquickjs;
