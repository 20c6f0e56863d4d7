//! Isolated realm engine
//!
//! Keeps one realm thread per import map generation and rebuilds it whenever
//! the map grows, since a realm's map is fixed when it is created. Guest
//! state never carries over: the realm gives every execution a new context.

use async_trait::async_trait;
use jsbox_core::{EngineError, EngineKind, ExecutionEngine, ExecutionResult, ModuleSettings, RealmSettings, Settings};
use jsbox_metrics::{names, Counter, ExecutionTimer};
use jsbox_modules::{HttpFetcher, SharedFetcher, SpecifierResolver};
use jsbox_script::RuntimeLimits;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::import_map::ImportMap;
use crate::realm::{spawn_realm, RealmConfig, RealmHandle};

pub struct RealmEngine {
    settings: RealmSettings,
    modules: ModuleSettings,
    resolver: SpecifierResolver,
    import_map: ImportMap,
    fetcher: Option<SharedFetcher>,
    injected: bool,
    realm: Option<RealmHandle>,
    ready: bool,
    timer: ExecutionTimer,
    counter: Counter,
}

impl RealmEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.realm.clone(),
            modules: settings.modules.clone(),
            resolver: SpecifierResolver::from_settings(&settings.modules),
            import_map: ImportMap::new(),
            fetcher: None,
            injected: false,
            realm: None,
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

    pub fn import_map(&self) -> &ImportMap {
        &self.import_map
    }

    /// Forget every mapped specifier. The current realm is discarded; the
    /// next execution builds one from the empty map.
    pub fn clear_import_map(&mut self) {
        self.import_map.clear();
        self.teardown_realm();
    }

    /// Realms built since construction
    pub fn rebuilds(&self) -> usize {
        self.counter.get(names::REALM_REBUILDS)
    }

    pub fn executions(&self) -> usize {
        self.counter.get(names::EXECUTIONS)
    }

    pub fn average_ms(&self) -> f64 {
        self.timer.average_ms()
    }

    fn teardown_realm(&mut self) {
        if let Some(realm) = self.realm.take() {
            realm.teardown();
        }
    }

    /// Replace the current realm with one built from the current map.
    async fn rebuild_realm(&mut self) -> Result<(), EngineError> {
        self.teardown_realm();
        let fetcher = self.fetcher.clone().ok_or(EngineError::NotReady)?;
        let mut realm = spawn_realm(RealmConfig {
            limits: RuntimeLimits::from(&self.settings),
            import_map: self.import_map.clone(),
            resolver: self.resolver.clone(),
            fetcher,
        })?;
        realm.wait_ready(self.settings.ready_timeout()).await?;
        self.counter.increment(names::REALM_REBUILDS, 1);
        tracing::debug!(realm = realm.id(), imports = self.import_map.len(), "realm built");
        self.realm = Some(realm);
        Ok(())
    }
}

impl Default for RealmEngine {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

#[async_trait]
impl ExecutionEngine for RealmEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Realm
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

        self.rebuild_realm().await?;
        self.ready = true;
        tracing::info!(
            response_timeout_ms = self.settings.response_timeout_ms,
            cdn_root = %self.resolver.root(),
            "realm engine ready"
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

        let grew = self.import_map.merge_from_source(source, &self.resolver);
        if grew || self.realm.is_none() {
            if grew {
                tracing::debug!(imports = self.import_map.len(), "import map grew; rebuilding realm");
            }
            self.rebuild_realm().await?;
        }
        let Some(realm) = self.realm.as_mut() else {
            return Err(EngineError::RealmClosed);
        };

        self.timer.begin();
        let response = realm.request(source, self.settings.response_timeout()).await;
        self.timer.end();
        self.counter.increment(names::EXECUTIONS, 1);

        match response {
            Ok(result) => {
                if result.is_error() {
                    self.counter.increment(names::GUEST_ERRORS, 1);
                }
                tracing::debug!(
                    logs = result.logs().len(),
                    failed = result.is_error(),
                    "realm execution finished"
                );
                Ok(result)
            }
            Err(err) => {
                if matches!(err, EngineError::ProtocolTimeout(_)) {
                    self.counter.increment(names::PROTOCOL_TIMEOUTS, 1);
                }
                tracing::warn!(error = %err, "realm failed to answer; discarding it");
                self.teardown_realm();
                Err(err)
            }
        }
    }

    async fn dispose(&mut self) {
        if !self.ready {
            return;
        }
        self.teardown_realm();
        self.ready = false;
        if !self.injected {
            self.fetcher = None;
        }
        tracing::info!("realm engine disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsbox_modules::StaticFetcher;

    fn fetcher() -> Arc<StaticFetcher> {
        Arc::new(
            StaticFetcher::new()
                .with_module("https://esm.sh/lodash", "export const add = (a, b) => a + b;")
                .with_module("https://esm.sh/lodash/fp", "export const inc = (a) => a + 1;")
                .with_module("https://esm.sh/nanoid", "export const nanoid = () => 'id-1';"),
        )
    }

    fn engine() -> RealmEngine {
        RealmEngine::default().with_fetcher(fetcher())
    }

    #[tokio::test]
    async fn not_ready_until_initialized() {
        let mut engine = engine();
        assert!(!engine.is_ready());
        assert!(matches!(engine.execute("1").await, Err(EngineError::NotReady)));
        engine.initialize().await.unwrap();
        assert!(engine.is_ready());
        assert_eq!(engine.kind(), EngineKind::Realm);
    }

    #[tokio::test]
    async fn import_map_grows_and_forces_rebuilds() {
        let mut engine = engine();
        engine.initialize().await.unwrap();
        assert_eq!(engine.rebuilds(), 1);

        let result = engine
            .execute("import { add } from 'lodash';\nexport default add(1, 2);")
            .await
            .unwrap();
        assert_eq!(result.return_value(), Some("3"));
        assert_eq!(engine.rebuilds(), 2);
        assert_eq!(engine.import_map().get("lodash"), Some("https://esm.sh/lodash"));
        assert_eq!(engine.import_map().get("lodash/"), Some("https://esm.sh/lodash/"));

        // Same specifiers: the realm is reused.
        engine.execute("import { add } from 'lodash';\nexport default add(2, 2);").await.unwrap();
        assert_eq!(engine.rebuilds(), 2);

        // A sub-path of a mapped package resolves through the prefix entry
        // but is still a new exact entry, so the map grows.
        let result = engine
            .execute("import { inc } from 'lodash/fp';\nexport default inc(1);")
            .await
            .unwrap();
        assert_eq!(result.return_value(), Some("2"));
        assert_eq!(engine.rebuilds(), 3);
    }

    #[tokio::test]
    async fn earlier_packages_stay_resolvable() {
        let mut engine = engine();
        engine.initialize().await.unwrap();
        engine.execute("import { add } from 'lodash';").await.unwrap();
        engine.execute("import { nanoid } from 'nanoid';").await.unwrap();

        // `lodash` is not named here but is still mapped in the rebuilt realm.
        let result = engine
            .execute("const m = await import('nanoid');\nconst l = await import('lodash');\nexport default l.add(1, 1) + m.nanoid();")
            .await
            .unwrap();
        assert_eq!(result.return_value(), Some("2id-1"));
    }

    #[tokio::test]
    async fn globals_do_not_leak_between_executions() {
        let mut engine = engine();
        engine.initialize().await.unwrap();
        engine.execute("globalThis.leaked = 'yes';").await.unwrap();
        let result = engine.execute("export default typeof leaked;").await.unwrap();
        assert_eq!(result.return_value(), Some("undefined"));
        assert_eq!(engine.rebuilds(), 1);
    }

    #[tokio::test]
    async fn clear_import_map_resets_resolution() {
        let mut engine = engine();
        engine.initialize().await.unwrap();
        engine.execute("import 'lodash';").await.unwrap();
        assert!(!engine.import_map().is_empty());

        engine.clear_import_map();
        assert!(engine.import_map().is_empty());
        let result = engine.execute("export default 1;").await.unwrap();
        assert_eq!(result.return_value(), Some("1"));
    }

    #[tokio::test]
    async fn timeout_discards_the_realm_but_not_the_engine() {
        let settings = Settings {
            realm: RealmSettings {
                response_timeout_ms: 200,
                ..RealmSettings::default()
            },
            ..Settings::default()
        };
        let mut engine = RealmEngine::new(&settings).with_fetcher(fetcher());
        engine.initialize().await.unwrap();

        let err = engine.execute("for (;;) {}").await.unwrap_err();
        assert!(matches!(err, EngineError::ProtocolTimeout(_)));
        assert!(err.is_fatal());
        assert!(engine.is_ready());

        let result = engine.execute("export default 'recovered';").await.unwrap();
        assert_eq!(result.return_value(), Some("recovered"));
    }

    #[tokio::test]
    async fn dispose_then_reinitialize() {
        let mut engine = engine();
        engine.initialize().await.unwrap();
        engine.execute("import 'lodash';").await.unwrap();
        engine.dispose().await;
        engine.dispose().await;
        assert!(!engine.is_ready());
        assert!(matches!(engine.execute("1").await, Err(EngineError::NotReady)));

        engine.initialize().await.unwrap();
        let result = engine
            .execute("import { add } from 'lodash';\nexport default add(20, 22);")
            .await
            .unwrap();
        assert_eq!(result.return_value(), Some("42"));
        assert_eq!(engine.import_map().get("lodash"), Some("https://esm.sh/lodash"));
    }
}
