//! Isolated realm on a dedicated OS thread
//!
//! A realm owns a QuickJS runtime whose module resolution is pinned to one
//! import map snapshot. Each execution runs in a context of its own, so no
//! guest state or compiled module outlives the call that produced it. The
//! host talks to it only through [`HostMessage`] and [`RealmMessage`];
//! nothing but the console sink is bound into the guest.
//!
//! Lifecycle:
//! 1. [`spawn_realm`] starts the thread and returns a [`RealmHandle`]
//! 2. the thread bootstraps, then sends `iframe-ready`
//! 3. each `execute-code` is answered by exactly one `execution-result`
//! 4. [`RealmHandle::teardown`] trips the kill switch and detaches the thread

use jsbox_core::{EngineError, ExecutionResult, LogLevel};
use jsbox_modules::resolver::{is_absolute_url, is_bare};
use jsbox_modules::{SharedFetcher, SpecifierResolver};
use jsbox_script::console::{self, ConsoleLog};
use jsbox_script::evaluate::{guest_failure, import_module, module_completion};
use jsbox_script::loader::{is_inline, FetchLoader, InlineModules, ModuleTrace};
use jsbox_script::rquickjs::function::Rest;
use jsbox_script::rquickjs::loader::Resolver;
use jsbox_script::rquickjs::{self, Ctx, Function, Object, Value};
use jsbox_script::{marshal, RejectionLog, RuntimeLimits, SandboxRuntime};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};

use crate::import_map::ImportMap;
use crate::protocol::{HostMessage, RealmMessage};

const REALM_THREAD_STACK: usize = 4 * 1024 * 1024;

/// Wraps each console method so it also records into the realm's log.
const BOOTSTRAP: &str = r#"
(function (record) {
  for (const level of ["log", "error", "warn", "info"]) {
    const original = console[level];
    console[level] = function (...args) {
      record(level, ...args);
      return original.apply(this, args);
    };
  }
})
"#;

static NEXT_REALM_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a realm thread is built from
#[derive(Clone)]
pub struct RealmConfig {
    pub limits: RuntimeLimits,
    pub import_map: ImportMap,
    pub resolver: SpecifierResolver,
    pub fetcher: SharedFetcher,
}

/// Resolution inside a realm: the import map for bare specifiers, URL joins
/// for relative ones, absolute URLs as written.
pub struct ImportMapResolver {
    map: ImportMap,
    resolver: SpecifierResolver,
}

impl ImportMapResolver {
    pub fn new(map: ImportMap, resolver: SpecifierResolver) -> Self {
        Self { map, resolver }
    }

    pub fn resolve_specifier(&self, base: &str, name: &str) -> Option<String> {
        if is_inline(name) || is_absolute_url(name) {
            return Some(name.to_string());
        }
        if is_bare(name) {
            return self.map.lookup(name);
        }
        // Relative: joined onto a fetched module's URL; from the entry module
        // a root path means the CDN root.
        Some(self.resolver.resolve_from(base, name))
    }
}

impl Resolver for ImportMapResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        self.resolve_specifier(base, name).ok_or_else(|| {
            rquickjs::Error::new_resolving_message(base, name, "specifier is not in the realm's import map")
        })
    }
}

/// Realm-side state; lives and dies on the realm thread.
struct Realm {
    id: u64,
    sandbox: SandboxRuntime,
    inline: InlineModules,
    log: ConsoleLog,
    rejections: RejectionLog,
    /// The current context has not run guest code yet
    fresh: bool,
}

impl Realm {
    fn new(id: u64, config: RealmConfig) -> rquickjs::Result<Self> {
        let mut sandbox = SandboxRuntime::new(&config.limits)?;
        let inline = InlineModules::new();
        sandbox.set_loader(
            ImportMapResolver::new(config.import_map, config.resolver),
            FetchLoader::new(inline.clone(), config.fetcher, ModuleTrace::default()),
        );
        let rejections = sandbox.track_rejections();

        let realm = Self {
            id,
            sandbox,
            inline,
            log: ConsoleLog::new(),
            rejections,
            fresh: true,
        };
        realm.install_globals()?;
        Ok(realm)
    }

    /// Console wiring for the current context.
    fn install_globals(&self) -> rquickjs::Result<()> {
        let log = self.log.clone();
        self.sandbox.context().with(|ctx| {
            install_tracing_console(&ctx, self.id)?;
            let bootstrap: Function = ctx.eval(BOOTSTRAP)?;
            bootstrap.call::<_, ()>((record_function(&ctx, log)?,))
        })
    }

    /// Every execution gets a context of its own; only the import map and
    /// the runtime's limits carry over.
    fn prepare_context(&mut self) -> rquickjs::Result<()> {
        if !self.fresh {
            self.sandbox.reset_context()?;
            self.install_globals()?;
        }
        self.fresh = false;
        Ok(())
    }

    fn execute(&mut self, code: &str) -> ExecutionResult {
        self.log.take();
        self.rejections.clear();
        if let Err(err) = self.prepare_context() {
            tracing::warn!(realm = self.id, error = %err, "failed to prepare a realm context");
            return ExecutionResult::failed(Vec::new(), format!("realm context unavailable: {err}"));
        }

        let name = self.inline.register("realm", code);
        let heap = self.sandbox.heap().clone();
        let outcome = self.sandbox.context().with(|ctx| {
            import_module(&ctx, &name)
                .and_then(|namespace| module_completion(&ctx, namespace))
                .map(|value| marshal::completion(&ctx, &value))
                .map_err(|err| guest_failure(&ctx, err, &heap))
        });
        self.inline.revoke(&name);
        self.sandbox.run_pending_jobs();

        let logs = self.log.take();
        match (outcome, self.rejections.first()) {
            (Err(error), _) => ExecutionResult::failed(logs, error.message()),
            (Ok(_), Some(rejection)) => ExecutionResult::failed(logs, rejection),
            (Ok(value), None) => ExecutionResult::completed(logs, value),
        }
    }
}

/// The realm's own console: forwards to `tracing` and nothing else.
fn install_tracing_console<'js>(ctx: &Ctx<'js>, realm: u64) -> rquickjs::Result<()> {
    let target = Object::new(ctx.clone())?;
    for level in LogLevel::ALL {
        let forward = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            tracing::debug!(realm, level = level.as_str(), "{}", console::format_args(&ctx, &args.0));
        })?;
        target.set(level.as_str(), forward)?;
    }
    ctx.globals().set("console", target)
}

/// Host side of the bootstrap's `record(level, ...args)`.
fn record_function<'js>(ctx: &Ctx<'js>, log: ConsoleLog) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |ctx: Ctx<'js>, level: String, args: Rest<Value<'js>>| {
        let level = level.parse().unwrap_or(LogLevel::Log);
        log.push(level, console::format_args(&ctx, &args.0));
    })
}

fn run_realm(
    id: u64,
    config: RealmConfig,
    commands: std_mpsc::Receiver<HostMessage>,
    events: mpsc::UnboundedSender<RealmMessage>,
) {
    let mut realm = match Realm::new(id, config) {
        Ok(realm) => realm,
        Err(err) => {
            tracing::warn!(realm = id, error = %err, "realm failed to bootstrap");
            return;
        }
    };
    if events.send(RealmMessage::Ready).is_err() {
        return;
    }

    while let Ok(message) = commands.recv() {
        match message {
            HostMessage::ExecuteCode { code } => {
                let result = realm.execute(&code);
                if events.send(RealmMessage::ExecutionResult { result }).is_err() {
                    break;
                }
            }
            HostMessage::Shutdown => break,
        }
    }
    tracing::debug!(realm = realm.id, "realm thread exiting");
}

/// Host-side end of a realm
pub struct RealmHandle {
    id: u64,
    commands: std_mpsc::Sender<HostMessage>,
    events: mpsc::UnboundedReceiver<RealmMessage>,
    kill_switch: Arc<AtomicBool>,
    ready: bool,
}

/// Start a realm thread built from `config`.
pub fn spawn_realm(config: RealmConfig) -> Result<RealmHandle, EngineError> {
    let id = NEXT_REALM_ID.fetch_add(1, Ordering::Relaxed);
    let kill_switch = Arc::new(AtomicBool::new(false));
    let config = RealmConfig {
        limits: config.limits.with_kill_switch(kill_switch.clone()),
        ..config
    };
    let (command_tx, command_rx) = std_mpsc::channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let imports = config.import_map.len();
    thread::Builder::new()
        .name(format!("jsbox-realm-{id}"))
        .stack_size(REALM_THREAD_STACK)
        .spawn(move || run_realm(id, config, command_rx, event_tx))
        .map_err(|err| EngineError::Initialization(format!("failed to spawn realm thread: {err}")))?;
    tracing::debug!(realm = id, imports, "realm spawned");

    Ok(RealmHandle {
        id,
        commands: command_tx,
        events: event_rx,
        kill_switch,
        ready: false,
    })
}

impl RealmHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the readiness signal has been seen
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Wait for `iframe-ready`. Past `limit` the realm is assumed ready; a
    /// realm that exits before signalling is an initialization failure.
    pub async fn wait_ready(&mut self, limit: Duration) -> Result<(), EngineError> {
        if self.ready {
            return Ok(());
        }
        match timeout(limit, self.events.recv()).await {
            Ok(Some(RealmMessage::Ready)) => {
                self.ready = true;
                Ok(())
            }
            Ok(Some(RealmMessage::ExecutionResult { .. })) => {
                tracing::warn!(realm = self.id, "unexpected result before readiness");
                Ok(())
            }
            Ok(None) => Err(EngineError::Initialization(
                "realm exited before signalling readiness".to_string(),
            )),
            Err(_) => {
                tracing::warn!(realm = self.id, ?limit, "realm readiness timed out; proceeding");
                Ok(())
            }
        }
    }

    /// Send one `execute-code` and wait for its result.
    pub async fn request(&mut self, code: &str, limit: Duration) -> Result<ExecutionResult, EngineError> {
        self.commands
            .send(HostMessage::ExecuteCode { code: code.to_string() })
            .map_err(|_| EngineError::RealmClosed)?;

        let deadline = Instant::now() + limit;
        loop {
            match timeout_at(deadline, self.events.recv()).await {
                Ok(Some(RealmMessage::ExecutionResult { result })) => return Ok(result),
                Ok(Some(RealmMessage::Ready)) => {
                    tracing::trace!(realm = self.id, "skipping late readiness signal");
                    self.ready = true;
                }
                Ok(None) => return Err(EngineError::RealmClosed),
                Err(_) => return Err(EngineError::ProtocolTimeout(limit)),
            }
        }
    }

    /// Stop the realm without waiting for it. A guest stuck in a loop is
    /// interrupted by the kill switch.
    pub fn teardown(self) {
        tracing::debug!(realm = self.id, "tearing down realm");
    }
}

impl Drop for RealmHandle {
    fn drop(&mut self) {
        self.kill_switch.store(true, Ordering::Relaxed);
        let _ = self.commands.send(HostMessage::Shutdown);
    }
}
