//! One guest execution on a fresh runtime
//!
//! Synchronous; the interpreter engine runs it on a blocking thread. Every VM
//! value lives inside the `Context::with` closure and only owned Rust data
//! leaves it, so the success, throw and host-error paths all release their
//! handles before the runtime is dropped.

use jsbox_core::ExecutionResult;
use jsbox_modules::{has_module_syntax, SharedFetcher, SpecifierResolver};
use rquickjs::{Ctx, Object, Promise, Value};

use crate::console::{self, ConsoleLog};
use crate::guest_error::GuestError;
use crate::heap::HeapMeter;
use crate::loader::{CdnResolver, FetchLoader, InlineModules, ModuleTrace};
use crate::marshal;
use crate::runtime::{drain_jobs, RuntimeLimits, SandboxRuntime};

/// Everything a blocking evaluation needs; all of it is `Send`.
pub struct EvalRequest {
    pub source: String,
    pub limits: RuntimeLimits,
    pub resolver: SpecifierResolver,
    pub fetcher: SharedFetcher,
}

#[derive(Debug)]
pub struct EvalOutcome {
    pub result: ExecutionResult,
    /// Module URLs fetched, in first-request order
    pub modules: Vec<String>,
    pub interrupts: u64,
}

/// Run `request.source` on a runtime allocated for this call alone.
///
/// `Err` only when the runtime itself could not be allocated; every guest
/// failure is reported through the returned result.
pub fn evaluate(request: EvalRequest) -> rquickjs::Result<EvalOutcome> {
    let EvalRequest {
        source,
        limits,
        resolver,
        fetcher,
    } = request;

    let sandbox = SandboxRuntime::new(&limits)?;
    let inline = InlineModules::new();
    let trace = ModuleTrace::default();
    sandbox.set_loader(
        CdnResolver::new(resolver),
        FetchLoader::new(inline.clone(), fetcher, trace.clone()),
    );

    let log = ConsoleLog::new();
    let heap = sandbox.heap().clone();
    let outcome = sandbox.context().with(|ctx| {
        console::install(&ctx, &log).map_err(|err| guest_failure(&ctx, err, &heap))?;
        run_source(&ctx, &inline, &source, &heap)
    });
    let interrupts = sandbox.interrupt_count();
    drop(sandbox);

    let logs = log.take();
    let result = match outcome {
        Ok(value) => ExecutionResult::completed(logs, value),
        Err(error) => ExecutionResult::failed(logs, error.message()),
    };
    Ok(EvalOutcome {
        result,
        modules: trace.urls(),
        interrupts,
    })
}

fn run_source<'js>(
    ctx: &Ctx<'js>,
    inline: &InlineModules,
    source: &str,
    heap: &HeapMeter,
) -> Result<Option<String>, GuestError> {
    let completion = if has_module_syntax(source) {
        let name = inline.register("main", source);
        let namespace = import_module(ctx, &name);
        inline.revoke(&name);
        namespace.and_then(|namespace| module_completion(ctx, namespace))
    } else {
        ctx.eval::<Value<'js>, _>(source).and_then(settle)
    };

    completion
        .map(|value| {
            // Callbacks the guest queued still run, and still log.
            drain_jobs(ctx);
            marshal::completion(ctx, &value)
        })
        .map_err(|err| guest_failure(ctx, err, heap))
}

/// Normalize a failed guest run, folding every form of heap exhaustion into
/// one out-of-memory message.
pub fn guest_failure<'js>(ctx: &Ctx<'js>, err: rquickjs::Error, heap: &HeapMeter) -> GuestError {
    let error = GuestError::from_error(ctx, err);
    if heap.exhausted() {
        error.on_exhausted_heap()
    } else {
        error
    }
}

/// `import(name)`, driven until the namespace is available.
pub fn import_module<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Object<'js>> {
    let quoted = serde_json::to_string(name).map_err(|err| rquickjs::Error::new_loading_message(name, err.to_string()))?;
    let promise: Promise<'js> = ctx.eval(format!("import({quoted})"))?;
    promise.finish::<Object<'js>>()
}

/// Completion value of a module: its default export, else its namespace when
/// it exports anything, else `undefined`.
pub fn module_completion<'js>(ctx: &Ctx<'js>, namespace: Object<'js>) -> rquickjs::Result<Value<'js>> {
    if namespace.contains_key("default")? {
        return namespace.get("default");
    }
    if namespace.keys::<String>().next().is_none() {
        return Ok(Value::new_undefined(ctx.clone()));
    }
    Ok(namespace.into_value())
}

/// A promise completion is replaced by what it settles to.
fn settle(value: Value<'_>) -> rquickjs::Result<Value<'_>> {
    match value.as_promise() {
        Some(promise) => promise.finish::<Value>(),
        None => Ok(value),
    }
}
