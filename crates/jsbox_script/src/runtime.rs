//! Script runtime management
//!
//! Builds QuickJS runtimes that cannot outgrow their budget: a native stack
//! ceiling enforced by QuickJS itself, a metered heap, and an interrupt
//! handler that aborts the guest when the heap passes its budget, after a
//! fixed number of interrupt cycles, or when the owner trips its kill switch.

use jsbox_core::{InterpreterSettings, RealmSettings};
use rquickjs::loader::{Loader, Resolver};
use rquickjs::{Context, Ctx, Runtime};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::heap::{HeapMeter, MeteredAllocator};
use crate::rejection::RejectionLog;

/// Resource ceilings applied to a [`SandboxRuntime`]
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Guest heap budget, on top of what the runtime holds once built
    pub memory_limit: usize,
    pub max_stack_size: usize,
    /// `None` never interrupts on its own; only the kill switch can.
    pub interrupt_budget: Option<u64>,
    pub kill_switch: Option<Arc<AtomicBool>>,
}

impl From<&InterpreterSettings> for RuntimeLimits {
    fn from(settings: &InterpreterSettings) -> Self {
        Self {
            memory_limit: settings.memory_limit,
            max_stack_size: settings.max_stack_size,
            interrupt_budget: Some(settings.interrupt_budget),
            kill_switch: None,
        }
    }
}

impl From<&RealmSettings> for RuntimeLimits {
    fn from(settings: &RealmSettings) -> Self {
        Self {
            memory_limit: settings.memory_limit,
            max_stack_size: settings.max_stack_size,
            interrupt_budget: None,
            kill_switch: None,
        }
    }
}

impl RuntimeLimits {
    pub fn with_kill_switch(mut self, kill_switch: Arc<AtomicBool>) -> Self {
        self.kill_switch = Some(kill_switch);
        self
    }
}

/// A QuickJS runtime with one full context and the limits installed.
///
/// Fields drop in declaration order: the context goes before the runtime, so
/// every handle the context owns is released while the runtime is still alive,
/// and the rejection log outlives the runtime that points at it.
pub struct SandboxRuntime {
    context: Context,
    runtime: Runtime,
    interrupts: Arc<AtomicU64>,
    heap: HeapMeter,
    rejections: Option<RejectionLog>,
}

impl SandboxRuntime {
    pub fn new(limits: &RuntimeLimits) -> rquickjs::Result<Self> {
        let heap = HeapMeter::new();
        let runtime = Runtime::new_with_alloc(MeteredAllocator::new(heap.clone()))?;
        runtime.set_max_stack_size(limits.max_stack_size);

        let interrupts = Arc::new(AtomicU64::new(0));
        let counter = interrupts.clone();
        let budget = limits.interrupt_budget;
        let kill_switch = limits.kill_switch.clone();
        let meter = heap.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            let cycles = counter.fetch_add(1, Ordering::Relaxed) + 1;
            let killed = kill_switch
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed));
            killed || meter.over_budget() || budget.is_some_and(|budget| cycles > budget)
        })));

        let context = Context::full(&runtime)?;
        // Armed after the intrinsics exist so the budget is the guest's alone.
        runtime.set_memory_limit(heap.arm(limits.memory_limit));

        Ok(Self {
            context,
            runtime,
            interrupts,
            heap,
            rejections: None,
        })
    }

    /// Swap in a brand new context; everything the guest left in the old one,
    /// compiled modules included, is released.
    pub fn reset_context(&mut self) -> rquickjs::Result<()> {
        let fresh = Context::full(&self.runtime)?;
        drop(std::mem::replace(&mut self.context, fresh));
        self.runtime.run_gc();
        self.heap.clear();
        Ok(())
    }

    /// Start recording unhandled promise rejections; the same log is returned
    /// on every call.
    pub fn track_rejections(&mut self) -> RejectionLog {
        if let Some(log) = &self.rejections {
            return log.clone();
        }
        let log = RejectionLog::new();
        // SAFETY: the log is stored in `self`, and fields drop after `runtime`.
        self.context.with(|ctx| unsafe { log.install(&ctx) });
        self.rejections = Some(log.clone());
        log
    }

    pub fn set_loader<R, L>(&self, resolver: R, loader: L)
    where
        R: Resolver + 'static,
        L: Loader + 'static,
    {
        self.runtime.set_loader(resolver, loader);
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Drain the job queue. Jobs that throw are counted and dropped; the
    /// rejection tracker is the place that observes them.
    pub fn run_pending_jobs(&self) -> usize {
        let mut executed = 0;
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => executed += 1,
                Ok(false) => break,
                Err(_) => executed += 1,
            }
        }
        executed
    }

    /// Interrupt cycles observed so far.
    pub fn interrupt_count(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    pub fn heap(&self) -> &HeapMeter {
        &self.heap
    }
}

/// Drain the job queue from inside a `Context::with` scope, where the
/// runtime-level [`SandboxRuntime::run_pending_jobs`] cannot take its lock.
pub fn drain_jobs(ctx: &Ctx<'_>) -> usize {
    let mut executed = 0;
    while ctx.execute_pending_job() {
        executed += 1;
    }
    executed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(budget: u64) -> RuntimeLimits {
        RuntimeLimits::from(&InterpreterSettings {
            interrupt_budget: budget,
            ..InterpreterSettings::default()
        })
    }

    #[test]
    fn evaluates_within_limits() {
        let sandbox = SandboxRuntime::new(&limits(1024)).unwrap();
        let sum = sandbox
            .context()
            .with(|ctx| ctx.eval::<i32, _>("let s = 0; for (let i = 0; i < 100; i++) s += i; s"))
            .unwrap();
        assert_eq!(sum, 4950);
    }

    #[test]
    fn infinite_loop_is_interrupted() {
        let sandbox = SandboxRuntime::new(&limits(4)).unwrap();
        let result = sandbox
            .context()
            .with(|ctx| ctx.eval::<(), _>("while (true) {}").map_err(|_| ctx.catch().is_object()));
        assert!(result.is_err());
        assert!(sandbox.interrupt_count() > 4);
    }

    #[test]
    fn kill_switch_interrupts_without_budget() {
        let kill = Arc::new(AtomicBool::new(true));
        let limits = RuntimeLimits::from(&RealmSettings::default()).with_kill_switch(kill);
        let sandbox = SandboxRuntime::new(&limits).unwrap();
        let result = sandbox
            .context()
            .with(|ctx| ctx.eval::<(), _>("for (;;) {}").map_err(|_| ctx.catch().is_object()));
        assert!(result.is_err());
    }

    #[test]
    fn pending_jobs_are_drained() {
        let sandbox = SandboxRuntime::new(&limits(1024)).unwrap();
        sandbox.context().with(|ctx| {
            ctx.eval::<(), _>("globalThis.done = false; Promise.resolve().then(() => { done = true })")
                .unwrap();
        });
        assert!(sandbox.run_pending_jobs() >= 1);
        let done = sandbox.context().with(|ctx| ctx.globals().get::<_, bool>("done").unwrap());
        assert!(done);
    }

    #[test]
    fn drain_jobs_runs_inside_a_context() {
        let sandbox = SandboxRuntime::new(&limits(1024)).unwrap();
        let done = sandbox.context().with(|ctx| {
            ctx.eval::<(), _>("globalThis.done = 0; Promise.resolve().then(() => done++).then(() => done++)")
                .unwrap();
            assert_eq!(drain_jobs(&ctx), 2);
            ctx.globals().get::<_, i32>("done").unwrap()
        });
        assert_eq!(done, 2);
    }

    #[test]
    fn fresh_context_forgets_guest_state() {
        let mut sandbox = SandboxRuntime::new(&limits(1024)).unwrap();
        sandbox
            .context()
            .with(|ctx| ctx.eval::<(), _>("globalThis.kept = 1").unwrap());
        sandbox.reset_context().unwrap();
        let kind = sandbox
            .context()
            .with(|ctx| ctx.eval::<String, _>("typeof kept").unwrap());
        assert_eq!(kind, "undefined");
    }

    #[test]
    fn heap_budget_stops_allocation_before_the_hard_limit() {
        let sandbox = SandboxRuntime::new(&limits(u64::MAX)).unwrap();
        let failed = sandbox.context().with(|ctx| {
            ctx.eval::<(), _>("const a = []; while (true) a.push({ n: a.length });")
                .map_err(|_| ctx.catch())
                .is_err()
        });
        assert!(failed);
        assert!(sandbox.heap().exhausted());
        assert!(sandbox.heap().used() < sandbox.heap().budget() + crate::heap::BACKSTOP_HEADROOM);
    }

    #[test]
    fn heap_ceiling_stops_runaway_allocation() {
        let sandbox = SandboxRuntime::new(&limits(u64::MAX)).unwrap();
        let result = sandbox.context().with(|ctx| {
            ctx.eval::<(), _>("const a = []; while (true) a.push('x'.repeat(1024));")
                .map_err(|_| {
                    let _ = ctx.catch();
                })
        });
        assert!(result.is_err());
    }
}
