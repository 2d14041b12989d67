use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sva_traits::{HostTree, NodeId};

use crate::bundle::{BundleLoader, BundleManager, BundleSpec, BundleStats};
use crate::cache::{CacheStats, RenderCache};
use crate::config::EngineConfig;
use crate::error::{IconError, IconResult};
use crate::identifier::{IconId, ModifierTag};
use crate::injector::{InjectionRecord, Injector, InjectorStats};
use crate::observer::{MutationObserver, ObserverState, ObserverStats};
use crate::performance::{PendingInjection, PerformanceManager, PerformanceMetrics};
use crate::registry::{IconDefinition, IconRegistry, RegistryStats};
use crate::report::{ErrorReporter, FailureEvent, FailureSource};
use crate::resolver::{NameResolver, ResolverStats};
use crate::scanner::{ScanReport, Scanner};

/// Outcome of [`IconEngine::initialize`]
#[derive(Debug, Clone, Default)]
pub struct InitReport {
    /// False when the scope or a required host capability was unavailable
    pub success: bool,
    pub icons_found: usize,
    pub icons_injected: usize,
    pub init_time: Duration,
    pub errors: Vec<IconError>,
}

/// Outcome of [`IconEngine::rescan`]
#[derive(Debug, Clone, Default)]
pub struct RescanReport {
    pub found: usize,
    pub injected: usize,
    pub scan_time: Duration,
    pub errors: Vec<IconError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub uptime: Duration,
    pub initialized: bool,
    pub icons_registered: usize,
    pub icons_found: u64,
    pub icons_injected: u64,
    pub rescans: u64,
    pub injector: InjectorStats,
    pub registry: RegistryStats,
    pub resolver: ResolverStats,
    pub cache: CacheStats,
    pub observer_state: ObserverState,
    pub observer: ObserverStats,
    pub performance: PerformanceMetrics,
    pub bundles: BundleStats,
    /// Failure counts by kind
    pub failures: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct Totals {
    found: u64,
    injected: u64,
    rescans: u64,
}

/// Result of one scan + inject pass
struct Pass {
    scan: ScanReport,
    injected: usize,
    errors: Vec<IconError>,
}

/// The icon injection engine.
///
/// Owns the registry, caches and bundle state for one host tree; nothing is
/// global, so several engines can decorate different trees side by side.
pub struct IconEngine {
    config: EngineConfig,
    host: Arc<dyn HostTree>,
    resolver: Arc<NameResolver>,
    scanner: Arc<Scanner>,
    injector: Arc<Injector>,
    observer: MutationObserver,
    performance: PerformanceManager,
    bundles: BundleManager,
    reporter: Arc<ErrorReporter>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    created: Instant,
    totals: Mutex<Totals>,
}

impl std::fmt::Debug for IconEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconEngine")
            .field("prefix", &self.config.prefix)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl IconEngine {
    /// Build an engine for `host`. The configuration is validated first.
    pub fn new(host: Arc<dyn HostTree>, config: EngineConfig) -> IconResult<Self> {
        config.validate()?;

        let registry = Arc::new(IconRegistry::new());
        let cache = Arc::new(RenderCache::new(config.cache_capacity));
        let resolver = Arc::new(NameResolver::new(registry, cache, &config));
        let reporter = Arc::new(ErrorReporter::new(config.logging));
        let bundles = BundleManager::new(
            Arc::clone(&resolver),
            Arc::clone(&reporter),
            config.bundles.clone(),
        );
        let scanner = Arc::new(Scanner::new(Arc::clone(&host), &config));
        let injector = Arc::new(
            Injector::new(
                Arc::clone(&host),
                Arc::clone(&resolver),
                Arc::clone(&reporter),
                &config,
            )
            .with_bundles(bundles.clone()),
        );
        let observer = MutationObserver::new(
            Arc::clone(&host),
            Arc::clone(&scanner),
            Arc::clone(&injector),
            Arc::clone(&reporter),
            &config,
        );
        let performance = PerformanceManager::new(
            Arc::clone(&injector),
            Some(bundles.clone()),
            config.performance.clone(),
        );

        tracing::debug!(prefix = %config.prefix, observe = config.observe, "Icon engine created");

        Ok(Self {
            config,
            host,
            resolver,
            scanner,
            injector,
            observer,
            performance,
            bundles,
            reporter,
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            created: Instant::now(),
            totals: Mutex::new(Totals::default()),
        })
    }

    /// Build an engine, register `definitions` and, when `auto_initialize` is
    /// set, run [`IconEngine::initialize`]
    pub async fn launch(
        host: Arc<dyn HostTree>,
        config: EngineConfig,
        definitions: impl IntoIterator<Item = IconDefinition>,
    ) -> IconResult<(Self, Option<InitReport>)> {
        let engine = Self::new(host, config)?;
        engine.register_icons(definitions);
        let report = if engine.config.auto_initialize {
            Some(engine.initialize().await)
        } else {
            None
        };
        Ok((engine, report))
    }

    /// Receive every failure event, whether or not logging is enabled
    pub fn with_error_handler(
        self,
        handler: impl Fn(&FailureEvent) + Send + Sync + 'static,
    ) -> Self {
        self.reporter.set_callback(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<NameResolver> {
        &self.resolver
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn observer(&self) -> &MutationObserver {
        &self.observer
    }

    pub fn performance(&self) -> &PerformanceManager {
        &self.performance
    }

    pub fn bundles(&self) -> &BundleManager {
        &self.bundles
    }

    /// The configured root scope, or the host root
    pub fn scope(&self) -> NodeId {
        self.config.root_scope.unwrap_or_else(|| self.host.root())
    }

    /// Register definitions, replacing any with the same name. Returns the count stored.
    pub fn register_icons(&self, definitions: impl IntoIterator<Item = IconDefinition>) -> usize {
        self.resolver.register_all(definitions)
    }

    pub fn register_bundle(&self, name: &str, spec: BundleSpec) -> IconResult<()> {
        self.bundles.register_bundle(name, spec)
    }

    pub fn set_bundle_loader(&self, loader: Arc<dyn BundleLoader>) {
        self.bundles.set_loader(loader);
    }

    pub async fn load_bundle(&self, name: &str) -> IconResult<()> {
        self.bundles.load_bundle(name).await
    }

    /// Queue a single injection through the performance manager
    pub fn process_icon(
        &self,
        node: NodeId,
        identifier: IconId,
        modifiers: Vec<ModifierTag>,
    ) -> PendingInjection {
        self.performance.process_icon(node, identifier, modifiers)
    }

    /// Scan the scope, inject every match and start observing.
    ///
    /// Node-level failures are listed in `errors` without affecting `success`;
    /// an unavailable scope or an unsupported host capability does.
    pub async fn initialize(&self) -> InitReport {
        let start = Instant::now();
        if self.destroyed.load(Ordering::Acquire) {
            return InitReport {
                errors: vec![IconError::Unsupported("engine has been destroyed".to_string())],
                init_time: start.elapsed(),
                ..Default::default()
            };
        }

        let scope = self.scope();
        let mut report = InitReport {
            success: true,
            ..Default::default()
        };

        match self.pass(scope).await {
            Ok(pass) => {
                report.icons_found = pass.scan.valid_nodes;
                report.icons_injected = pass.injected;
                report.errors = pass.errors;
            }
            Err(error) => {
                self.reporter
                    .report(FailureEvent::new(FailureSource::Initialize, error.clone()));
                report.success = false;
                report.errors.push(error);
                report.init_time = start.elapsed();
                return report;
            }
        }

        if self.config.observe {
            if let Err(error) = self.observer.start(scope) {
                self.reporter
                    .report(FailureEvent::new(FailureSource::Initialize, error.clone()));
                report.success = false;
                report.errors.push(error);
            }
        }

        self.initialized.store(true, Ordering::Release);
        report.init_time = start.elapsed();
        tracing::debug!(
            success = report.success,
            found = report.icons_found,
            injected = report.icons_injected,
            errors = report.errors.len(),
            elapsed_ms = report.init_time.as_millis() as u64,
            "Icon engine initialized"
        );
        report
    }

    /// Scan and inject again, over `scope` or the configured scope
    pub async fn rescan(&self, scope: Option<NodeId>) -> RescanReport {
        let start = Instant::now();
        let scope = scope.unwrap_or_else(|| self.scope());
        self.totals.lock().rescans += 1;

        match self.pass(scope).await {
            Ok(pass) => RescanReport {
                found: pass.scan.valid_nodes,
                injected: pass.injected,
                scan_time: start.elapsed(),
                errors: pass.errors,
            },
            Err(error) => {
                self.reporter
                    .report(FailureEvent::new(FailureSource::Scan, error.clone()));
                RescanReport {
                    scan_time: start.elapsed(),
                    errors: vec![error],
                    ..Default::default()
                }
            }
        }
    }

    async fn pass(&self, scope: NodeId) -> IconResult<Pass> {
        let scan = self.scanner.scan(scope).await?;

        let mut errors = Vec::new();
        for issue in &scan.errors {
            self.reporter.report(
                FailureEvent::new(FailureSource::Scan, issue.error.clone()).with_node(issue.node),
            );
            errors.push(issue.error.clone());
        }

        if self.config.performance.lazy_loading && !scan.matches.is_empty() {
            let mut wanted: Vec<IconId> = scan
                .matches
                .iter()
                .map(|found| found.identifier.clone())
                .collect();
            wanted.sort_unstable();
            wanted.dedup();
            for (bundle, result) in self.bundles.load_for_icons(&wanted).await {
                if let Err(error) = result {
                    tracing::debug!(bundle = %bundle, error = %error, "Bundle needed by scan failed to load");
                    errors.push(error);
                }
            }
        }

        let start = Instant::now();
        let mut injected = 0;
        for (index, chunk) in scan.matches.chunks(self.config.batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
            }
            self.injector.prewarm(chunk);
            for found in chunk {
                match self
                    .injector
                    .inject(found.node, &found.identifier, &found.modifiers)
                {
                    Ok(record) => {
                        if record.success {
                            injected += 1;
                        } else if let Some(error) = failure_of(&record) {
                            errors.push(error);
                        }
                    }
                    Err(error) => errors.push(error),
                }
            }
        }
        self.performance.record_batch(scan.matches.len(), start.elapsed());

        {
            let mut totals = self.totals.lock();
            totals.found += scan.valid_nodes as u64;
            totals.injected += injected as u64;
        }
        Ok(Pass {
            scan,
            injected,
            errors,
        })
    }

    pub fn stats(&self) -> EngineStats {
        let totals = self.totals.lock();
        EngineStats {
            uptime: self.created.elapsed(),
            initialized: self.initialized.load(Ordering::Acquire),
            icons_registered: self.resolver.registry().len(),
            icons_found: totals.found,
            icons_injected: totals.injected,
            rescans: totals.rescans,
            injector: self.injector.stats(),
            registry: self.resolver.registry().stats(),
            resolver: self.resolver.stats(),
            cache: self.resolver.render_cache().stats(),
            observer_state: self.observer.state(),
            observer: self.observer.stats(),
            performance: self.performance.metrics(),
            bundles: self.bundles.stats(),
            failures: self.reporter.counts(),
        }
    }

    /// Stop observing, drain queued work and release caches.
    ///
    /// Returns the statistics as they stood after the final flush. Injected
    /// content stays in the host tree.
    pub async fn destroy(&self) -> EngineStats {
        self.observer.stop().await;
        self.performance.shutdown().await;
        let stats = self.stats();

        self.destroyed.store(true, Ordering::Release);
        self.resolver.clear();
        self.reporter.clear_callback();
        tracing::debug!(
            injected = stats.icons_injected,
            uptime_ms = stats.uptime.as_millis() as u64,
            "Icon engine destroyed"
        );
        stats
    }
}

/// Failures worth surfacing in a report; a node that was already processed is not one
fn failure_of(record: &InjectionRecord) -> Option<IconError> {
    record
        .error
        .clone()
        .filter(|error| !matches!(error, IconError::AlreadyProcessed(_)))
}
