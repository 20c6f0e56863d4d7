//! Module loading for sandboxed runtimes
//!
//! QuickJS asks the resolver for a module name and then the loader for its
//! source, depth-first in the order the linker encounters imports. Names
//! registered as inline modules (the entry point of an execution) are served
//! once from memory; everything else is fetched.

use jsbox_modules::{SharedFetcher, SpecifierResolver};
use parking_lot::Mutex;
use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Error, Module};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Name prefix of modules served from memory instead of the network
pub const INLINE_SCHEME: &str = "jsbox:";

pub fn is_inline(name: &str) -> bool {
    name.starts_with(INLINE_SCHEME)
}

/// One-shot sources handed to the loader by name.
///
/// A registration is consumed by the first load of that name; an unconsumed
/// one can be revoked. Either way it serves at most one import.
#[derive(Debug, Clone, Default)]
pub struct InlineModules {
    sources: Arc<Mutex<HashMap<String, String>>>,
    next_id: Arc<AtomicU64>,
}

impl InlineModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under a fresh inline name and return the name.
    pub fn register(&self, label: &str, source: impl Into<String>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{INLINE_SCHEME}{label}/{id}.js");
        self.sources.lock().insert(name.clone(), source.into());
        name
    }

    pub fn take(&self, name: &str) -> Option<String> {
        self.sources.lock().remove(name)
    }

    pub fn revoke(&self, name: &str) {
        self.sources.lock().remove(name);
    }

    pub fn pending(&self) -> usize {
        self.sources.lock().len()
    }
}

/// URLs fetched during one execution, in load order
#[derive(Debug, Clone, Default)]
pub struct ModuleTrace(Arc<Mutex<Vec<String>>>);

impl ModuleTrace {
    pub fn record(&self, url: &str) {
        self.0.lock().push(url.to_string());
    }

    pub fn urls(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Resolves through the CDN resolver; inline names resolve to themselves.
pub struct CdnResolver {
    resolver: SpecifierResolver,
}

impl CdnResolver {
    pub fn new(resolver: SpecifierResolver) -> Self {
        Self { resolver }
    }
}

impl Resolver for CdnResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        if is_inline(name) {
            return Ok(name.to_string());
        }
        let resolved = self.resolver.resolve_from(base, name);
        tracing::trace!(%base, %name, %resolved, "resolved module");
        Ok(resolved)
    }
}

/// Serves inline modules from memory and fetches the rest.
pub struct FetchLoader {
    inline: InlineModules,
    fetcher: SharedFetcher,
    trace: ModuleTrace,
}

impl FetchLoader {
    pub fn new(inline: InlineModules, fetcher: SharedFetcher, trace: ModuleTrace) -> Self {
        Self {
            inline,
            fetcher,
            trace,
        }
    }
}

impl Loader for FetchLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        if is_inline(name) {
            let source = self
                .inline
                .take(name)
                .ok_or_else(|| Error::new_loading_message(name, "inline module was already consumed"))?;
            return Module::declare(ctx.clone(), name, source);
        }

        let source = self
            .fetcher
            .fetch(name)
            .map_err(|err| Error::new_loading_message(name, err.to_string()))?;
        self.trace.record(name);
        Module::declare(ctx.clone(), name, source)
    }
}
