//! Sandboxed interpreter engine
//!
//! Every `execute` allocates a fresh bounded runtime on tokio's blocking pool
//! and throws it away afterwards; nothing the guest does survives the call.

use async_trait::async_trait;
use jsbox_core::{
    EngineError, EngineKind, ExecutionEngine, ExecutionResult, InterpreterSettings, ModuleSettings,
    Settings,
};
use jsbox_metrics::{names, Counter, ExecutionTimer};
use jsbox_modules::{HttpFetcher, SharedFetcher, SpecifierResolver};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task;

use crate::evaluate::{evaluate, EvalRequest};
use crate::runtime::{RuntimeLimits, SandboxRuntime};

pub struct InterpreterEngine {
    settings: InterpreterSettings,
    modules: ModuleSettings,
    resolver: SpecifierResolver,
    fetcher: Option<SharedFetcher>,
    /// Fetcher supplied by the caller; kept across `dispose`
    injected: bool,
    ready: bool,
    timer: ExecutionTimer,
    counter: Counter,
}

impl InterpreterEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.interpreter.clone(),
            modules: settings.modules.clone(),
            resolver: SpecifierResolver::from_settings(&settings.modules),
            fetcher: None,
            injected: false,
            ready: false,
            timer: ExecutionTimer::default(),
            counter: Counter::new(),
        }
    }

    /// Use `fetcher` for module source instead of HTTP.
    pub fn with_fetcher(mut self, fetcher: SharedFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self.injected = true;
        self
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// Executions run since construction
    pub fn executions(&self) -> usize {
        self.counter.get(names::EXECUTIONS)
    }

    /// Mean wall time of recent executions, in milliseconds
    pub fn average_ms(&self) -> f64 {
        self.timer.average_ms()
    }
}

impl Default for InterpreterEngine {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

#[async_trait]
impl ExecutionEngine for InterpreterEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Interpreter
    }

    async fn initialize(&mut self) -> Result<(), EngineError> {
        if self.ready {
            return Ok(());
        }
        Handle::try_current().map_err(|err| EngineError::Initialization(err.to_string()))?;

        if self.fetcher.is_none() {
            let fetcher = HttpFetcher::new(&self.modules)
                .map_err(|err| EngineError::Initialization(err.to_string()))?;
            self.fetcher = Some(Arc::new(fetcher));
        }

        // Fail here rather than on the first execute if QuickJS cannot allocate.
        let limits = RuntimeLimits::from(&self.settings);
        task::spawn_blocking(move || SandboxRuntime::new(&limits).map(drop).map_err(|err| err.to_string()))
            .await
            .map_err(|err| EngineError::Initialization(err.to_string()))?
            .map_err(EngineError::Initialization)?;

        self.ready = true;
        tracing::info!(
            memory_limit = self.settings.memory_limit,
            interrupt_budget = self.settings.interrupt_budget,
            cdn_root = %self.resolver.root(),
            "interpreter engine ready"
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn execute(&mut self, source: &str) -> Result<ExecutionResult, EngineError> {
        if !self.ready {
            return Err(EngineError::NotReady);
        }
        let fetcher = self.fetcher.clone().ok_or(EngineError::NotReady)?;

        let request = EvalRequest {
            source: source.to_string(),
            limits: RuntimeLimits::from(&self.settings),
            resolver: self.resolver.clone(),
            fetcher,
        };

        self.timer.begin();
        let joined = task::spawn_blocking(move || evaluate(request).map_err(|err| err.to_string())).await;
        self.timer.end();
        self.counter.increment(names::EXECUTIONS, 1);

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                // The runtime could not be allocated; the guest never ran.
                tracing::warn!(error = %err, "failed to allocate interpreter runtime");
                self.counter.increment(names::GUEST_ERRORS, 1);
                return Ok(ExecutionResult::failed(Vec::new(), err));
            }
            Err(err) => return Err(EngineError::Crashed(err.to_string())),
        };

        self.counter.increment(names::MODULE_FETCHES, outcome.modules.len());
        if outcome.result.is_error() {
            self.counter.increment(names::GUEST_ERRORS, 1);
        }
        tracing::debug!(
            logs = outcome.result.logs().len(),
            modules = outcome.modules.len(),
            interrupts = outcome.interrupts,
            failed = outcome.result.is_error(),
            "interpreter execution finished"
        );
        Ok(outcome.result)
    }

    async fn dispose(&mut self) {
        if !self.ready {
            return;
        }
        self.ready = false;
        if !self.injected {
            self.fetcher = None;
        }
        tracing::info!("interpreter engine disposed");
    }
}
