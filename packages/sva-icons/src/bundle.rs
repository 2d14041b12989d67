//! Named icon bundles: dependency-ordered loading, usage tracking and
//! tree-shaking analysis.
//!
//! A bundle is metadata (its icons and the bundles it depends on) until it is
//! loaded. Loading is delegated to a [`BundleLoader`] supplied by the
//! application; the definitions it returns are registered through the
//! resolver. Concurrent requests for the same bundle share one in-flight load.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::BundleConfig;
use crate::error::{IconError, IconResult};
use crate::identifier::IconId;
use crate::registry::IconDefinition;
use crate::report::{ErrorReporter, FailureEvent, FailureSource};
use crate::resolver::NameResolver;

/// Produces the definitions of a bundle, e.g. by fetching a module over the network
#[async_trait]
pub trait BundleLoader: Send + Sync {
    async fn load(&self, bundle: &str, icons: &[IconId]) -> Result<Vec<IconDefinition>, String>;
}

/// Bundle metadata supplied at registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSpec {
    pub icons: Vec<IconId>,
    pub dependencies: Vec<String>,
}

impl BundleSpec {
    pub fn new(icons: impl IntoIterator<Item = IconId>) -> Self {
        Self {
            icons: icons.into_iter().collect(),
            dependencies: Vec::new(),
        }
    }

    /// Build from raw identifier strings, validating each
    pub fn from_names<'a>(icons: impl IntoIterator<Item = &'a str>) -> IconResult<Self> {
        let icons = icons
            .into_iter()
            .map(IconId::parse)
            .collect::<IconResult<Vec<_>>>()?;
        Ok(Self::new(icons))
    }

    pub fn with_dependencies<'a>(mut self, dependencies: impl IntoIterator<Item = &'a str>) -> Self {
        self.dependencies = dependencies.into_iter().map(str::to_owned).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Snapshot of one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    pub name: String,
    pub icons: Vec<IconId>,
    pub dependencies: Vec<String>,
    pub state: LoadState,
    /// Loader calls made by the most recent load request
    pub attempts: u32,
    pub last_error: Option<IconError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BundleClass {
    Unused,
    Underutilized,
    Normal,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleUsage {
    pub name: String,
    pub total_icons: usize,
    pub used_icons: usize,
    pub usage_ratio: f64,
    pub uses: u64,
    pub state: LoadState,
    pub class: BundleClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    /// Load eagerly at startup
    Preload { bundle: String, reason: String },
    /// Load on first use only
    LazyLoad { bundle: String, reason: String },
    /// Drop from the distribution
    Remove { bundle: String, reason: String },
}

/// Result of [`BundleManager::analyze`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeShakingReport {
    pub bundles: Vec<BundleUsage>,
    pub unused: Vec<String>,
    pub underutilized: Vec<String>,
    pub critical: Vec<String>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BundleStats {
    pub registered: usize,
    pub loaded: usize,
    pub loading: usize,
    pub failed: usize,
    /// Loader invocations, retries included
    pub loader_calls: u64,
}

struct BundleEntry {
    spec: BundleSpec,
    state: LoadState,
    attempts: u32,
    last_error: Option<IconError>,
    loaded_at: Option<Instant>,
}

type LoadFuture = Shared<BoxFuture<'static, IconResult<()>>>;

struct BundleManagerInner {
    bundles: RwLock<AHashMap<String, BundleEntry>>,
    index: RwLock<AHashMap<IconId, String>>,
    in_flight: Mutex<AHashMap<String, LoadFuture>>,
    usage: Mutex<AHashMap<IconId, u64>>,
    loader: RwLock<Option<Arc<dyn BundleLoader>>>,
    resolver: Arc<NameResolver>,
    reporter: Arc<ErrorReporter>,
    config: BundleConfig,
    loader_calls: AtomicU64,
}

/// Cheap handle; clones share the same bundle table
#[derive(Clone)]
pub struct BundleManager {
    inner: Arc<BundleManagerInner>,
}

impl std::fmt::Debug for BundleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleManager")
            .field("stats", &self.stats())
            .finish()
    }
}

impl BundleManager {
    pub fn new(
        resolver: Arc<NameResolver>,
        reporter: Arc<ErrorReporter>,
        config: BundleConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BundleManagerInner {
                bundles: RwLock::new(AHashMap::new()),
                index: RwLock::new(AHashMap::new()),
                in_flight: Mutex::new(AHashMap::new()),
                usage: Mutex::new(AHashMap::new()),
                loader: RwLock::new(None),
                resolver,
                reporter,
                config,
                loader_calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_loader(&self, loader: Arc<dyn BundleLoader>) {
        *self.inner.loader.write() = Some(loader);
    }

    /// Register bundle metadata. Re-registering replaces the icon list and
    /// dependencies but keeps the load state.
    pub fn register_bundle(&self, name: &str, spec: BundleSpec) -> IconResult<()> {
        if name.trim().is_empty() {
            return Err(IconError::Config("bundle name must not be empty".to_string()));
        }
        {
            let mut index = self.inner.index.write();
            index.retain(|_, owner| owner != name);
            for icon in &spec.icons {
                index.insert(icon.clone(), name.to_string());
            }
        }
        let mut bundles = self.inner.bundles.write();
        match bundles.get_mut(name) {
            Some(entry) => entry.spec = spec,
            None => {
                bundles.insert(
                    name.to_string(),
                    BundleEntry {
                        spec,
                        state: LoadState::Unloaded,
                        attempts: 0,
                        last_error: None,
                        loaded_at: None,
                    },
                );
            }
        }
        tracing::debug!(bundle = name, "Registered bundle");
        Ok(())
    }

    /// Bundle that ships `icon`, if any
    pub fn bundle_for_icon(&self, icon: &IconId) -> Option<String> {
        self.inner.index.read().get(icon).cloned()
    }

    pub fn state(&self, name: &str) -> Option<LoadState> {
        self.inner.bundles.read().get(name).map(|entry| entry.state)
    }

    pub fn info(&self, name: &str) -> Option<BundleInfo> {
        self.inner.bundles.read().get(name).map(|entry| BundleInfo {
            name: name.to_string(),
            icons: entry.spec.icons.clone(),
            dependencies: entry.spec.dependencies.clone(),
            state: entry.state,
            attempts: entry.attempts,
            last_error: entry.last_error.clone(),
        })
    }

    /// Time since the bundle finished loading
    pub fn loaded_for(&self, name: &str) -> Option<Duration> {
        self.inner
            .bundles
            .read()
            .get(name)
            .and_then(|entry| entry.loaded_at)
            .map(|at| at.elapsed())
    }

    /// Load a bundle and, first, its dependencies (depth-first).
    ///
    /// Every bundle is loaded at most once; a request for a bundle that is
    /// already loading waits for that load instead of starting another.
    /// Unknown bundles and dependency cycles are rejected before anything loads.
    pub fn load_bundle(&self, name: &str) -> BoxFuture<'static, IconResult<()>> {
        let manager = self.clone();
        let name = name.to_string();
        async move {
            manager.check_graph(&name)?;
            manager.load_tree(name).await
        }
        .boxed()
    }

    /// Load every bundle that ships one of `icons` but is not registered yet.
    /// Returns the per-bundle outcome.
    pub async fn load_for_icons(&self, icons: &[IconId]) -> Vec<(String, IconResult<()>)> {
        let registry = self.inner.resolver.registry();
        let mut wanted: Vec<String> = Vec::new();
        for icon in icons {
            if registry.contains(icon) {
                continue;
            }
            if let Some(bundle) = self.bundle_for_icon(icon) {
                if !wanted.contains(&bundle) && self.state(&bundle) != Some(LoadState::Loaded) {
                    wanted.push(bundle);
                }
            }
        }
        let results = join_all(wanted.iter().map(|bundle| self.load_bundle(bundle))).await;
        wanted.into_iter().zip(results).collect()
    }

    /// Return a bundle to `Unloaded`, unregistering its icons.
    ///
    /// Returns `false` if the bundle was not loaded. A bundle that is loading
    /// cannot be unloaded.
    pub fn unload_bundle(&self, name: &str) -> IconResult<bool> {
        let icons = {
            let mut bundles = self.inner.bundles.write();
            let entry = bundles
                .get_mut(name)
                .ok_or_else(|| IconError::UnknownBundle(name.to_string()))?;
            match entry.state {
                LoadState::Loading => {
                    return Err(IconError::Unsupported(format!(
                        "bundle {name} is loading and cannot be unloaded"
                    )));
                }
                LoadState::Loaded => {}
                LoadState::Unloaded | LoadState::Failed => {
                    entry.state = LoadState::Unloaded;
                    return Ok(false);
                }
            }
            entry.state = LoadState::Unloaded;
            entry.loaded_at = None;
            entry.spec.icons.clone()
        };
        for icon in &icons {
            self.inner.resolver.unregister(icon);
        }
        tracing::debug!(bundle = name, icons = icons.len(), "Unloaded bundle");
        Ok(true)
    }

    pub fn record_usage(&self, icon: &IconId) {
        *self.inner.usage.lock().entry(icon.clone()).or_default() += 1;
    }

    pub fn usage(&self, icon: &IconId) -> u64 {
        self.inner.usage.lock().get(icon).copied().unwrap_or(0)
    }

    pub fn reset_usage(&self) {
        self.inner.usage.lock().clear();
    }

    /// Classify bundles by the share of their icons that have been used
    pub fn analyze(&self) -> TreeShakingReport {
        let usage = self.inner.usage.lock().clone();
        let bundles = self.inner.bundles.read();
        let underutilized_below = self.inner.config.underutilized_threshold;
        let critical_above = self.inner.config.critical_threshold;

        let mut names: Vec<&String> = bundles.keys().collect();
        names.sort();

        let mut report = TreeShakingReport::default();
        for name in names {
            let entry = &bundles[name];
            let total_icons = entry.spec.icons.len();
            let used: Vec<u64> = entry
                .spec
                .icons
                .iter()
                .filter_map(|icon| usage.get(icon).copied())
                .filter(|count| *count > 0)
                .collect();
            let used_icons = used.len();
            let usage_ratio = if total_icons == 0 {
                0.0
            } else {
                used_icons as f64 / total_icons as f64
            };

            let class = if used_icons == 0 {
                BundleClass::Unused
            } else if usage_ratio < underutilized_below {
                BundleClass::Underutilized
            } else if usage_ratio > critical_above {
                BundleClass::Critical
            } else {
                BundleClass::Normal
            };

            let percent = (usage_ratio * 100.0).round();
            match class {
                BundleClass::Unused => {
                    report.unused.push(name.clone());
                    report.recommendations.push(Recommendation::Remove {
                        bundle: name.clone(),
                        reason: format!("none of its {total_icons} icons were used"),
                    });
                }
                BundleClass::Underutilized => {
                    report.underutilized.push(name.clone());
                    report.recommendations.push(Recommendation::LazyLoad {
                        bundle: name.clone(),
                        reason: format!("only {used_icons} of {total_icons} icons used ({percent}%)"),
                    });
                }
                BundleClass::Critical => {
                    report.critical.push(name.clone());
                    report.recommendations.push(Recommendation::Preload {
                        bundle: name.clone(),
                        reason: format!("{used_icons} of {total_icons} icons used ({percent}%)"),
                    });
                }
                BundleClass::Normal => {}
            }

            report.bundles.push(BundleUsage {
                name: name.clone(),
                total_icons,
                used_icons,
                usage_ratio,
                uses: used.iter().sum(),
                state: entry.state,
                class,
            });
        }
        report
    }

    pub fn stats(&self) -> BundleStats {
        let bundles = self.inner.bundles.read();
        let count = |state: LoadState| bundles.values().filter(|e| e.state == state).count();
        BundleStats {
            registered: bundles.len(),
            loaded: count(LoadState::Loaded),
            loading: count(LoadState::Loading),
            failed: count(LoadState::Failed),
            loader_calls: self.inner.loader_calls.load(Ordering::Relaxed),
        }
    }

    fn check_graph(&self, root: &str) -> IconResult<()> {
        fn visit(
            bundles: &AHashMap<String, BundleEntry>,
            name: &str,
            path: &mut Vec<String>,
            done: &mut AHashSet<String>,
        ) -> IconResult<()> {
            if done.contains(name) {
                return Ok(());
            }
            if let Some(position) = path.iter().position(|seen| seen == name) {
                let mut cycle = path[position..].to_vec();
                cycle.push(name.to_string());
                return Err(IconError::DependencyCycle(cycle));
            }
            let entry = bundles
                .get(name)
                .ok_or_else(|| IconError::UnknownBundle(name.to_string()))?;
            path.push(name.to_string());
            for dependency in &entry.spec.dependencies {
                visit(bundles, dependency, path, done)?;
            }
            path.pop();
            done.insert(name.to_string());
            Ok(())
        }

        let bundles = self.inner.bundles.read();
        visit(&bundles, root, &mut Vec::new(), &mut AHashSet::new())
    }

    fn load_tree(&self, name: String) -> BoxFuture<'static, IconResult<()>> {
        let manager = self.clone();
        async move {
            let dependencies = manager
                .inner
                .bundles
                .read()
                .get(&name)
                .map(|entry| entry.spec.dependencies.clone())
                .ok_or_else(|| IconError::UnknownBundle(name.clone()))?;
            for dependency in dependencies {
                manager.load_tree(dependency).await?;
            }
            manager.load_single(&name).await
        }
        .boxed()
    }

    async fn load_single(&self, name: &str) -> IconResult<()> {
        let load = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(name) {
                Some(existing) => {
                    tracing::trace!(bundle = name, "Joining in-flight bundle load");
                    existing.clone()
                }
                None => {
                    {
                        let mut bundles = self.inner.bundles.write();
                        let entry = bundles
                            .get_mut(name)
                            .ok_or_else(|| IconError::UnknownBundle(name.to_string()))?;
                        if entry.state == LoadState::Loaded {
                            return Ok(());
                        }
                        if self.inner.loader.read().is_none() {
                            return Err(IconError::Unsupported(
                                "no bundle loader installed".to_string(),
                            ));
                        }
                        entry.state = LoadState::Loading;
                        entry.attempts = 0;
                    }
                    let load = self.clone().run_load(name.to_string()).boxed().shared();
                    in_flight.insert(name.to_string(), load.clone());
                    load
                }
            }
        };
        load.await
    }

    async fn run_load(self, name: String) -> IconResult<()> {
        let icons = self
            .inner
            .bundles
            .read()
            .get(&name)
            .map(|entry| entry.spec.icons.clone())
            .unwrap_or_default();
        let loader = self.inner.loader.read().clone();
        let max_attempts = self.inner.config.max_retries.max(1);
        let timeout = self.inner.config.load_timeout();
        let start = Instant::now();

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let Some(loader) = loader.as_ref() else {
                break;
            };
            self.inner.loader_calls.fetch_add(1, Ordering::Relaxed);
            let outcome = match tokio::time::timeout(timeout, loader.load(&name, &icons)).await {
                Ok(Ok(definitions)) => Ok(definitions),
                Ok(Err(reason)) => Err(IconError::BundleLoadFailed {
                    bundle: name.clone(),
                    attempts: attempt,
                    reason,
                }),
                Err(_) => Err(IconError::BundleLoadTimeout {
                    bundle: name.clone(),
                    timeout,
                }),
            };

            match outcome {
                Ok(definitions) => {
                    let registered = self.inner.resolver.register_all(definitions);
                    self.finish(&name, attempt, None);
                    tracing::debug!(
                        bundle = %name,
                        attempt,
                        registered,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Bundle loaded"
                    );
                    return Ok(());
                }
                Err(error) => {
                    tracing::debug!(bundle = %name, attempt, error = %error, "Bundle load attempt failed");
                    last_error = Some(error);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.inner.config.retry_delay()).await;
                    }
                }
            }
        }

        let error = match last_error {
            Some(timed_out @ IconError::BundleLoadTimeout { .. }) => timed_out,
            Some(other) => IconError::BundleLoadFailed {
                bundle: name.clone(),
                attempts: max_attempts,
                reason: match other {
                    IconError::BundleLoadFailed { reason, .. } => reason,
                    other => other.to_string(),
                },
            },
            None => IconError::Unsupported("no bundle loader installed".to_string()),
        };
        self.finish(&name, max_attempts, Some(error.clone()));
        self.inner.reporter.report(
            FailureEvent::new(FailureSource::BundleLoad, error.clone()).with_identifier(name.as_str()),
        );
        Err(error)
    }

    fn finish(&self, name: &str, attempts: u32, error: Option<IconError>) {
        {
            let mut bundles = self.inner.bundles.write();
            if let Some(entry) = bundles.get_mut(name) {
                entry.attempts = attempts;
                if error.is_some() {
                    entry.state = LoadState::Failed;
                } else {
                    entry.state = LoadState::Loaded;
                    entry.loaded_at = Some(Instant::now());
                }
                entry.last_error = error;
            }
        }
        self.inner.in_flight.lock().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RenderCache;
    use crate::config::EngineConfig;
    use crate::registry::IconRegistry;

    fn manager() -> BundleManager {
        let resolver = Arc::new(NameResolver::new(
            Arc::new(IconRegistry::new()),
            Arc::new(RenderCache::new(8)),
            &EngineConfig::default(),
        ));
        BundleManager::new(
            resolver,
            Arc::new(ErrorReporter::new(false)),
            BundleConfig::default(),
        )
    }

    fn ids(names: &[&str]) -> Vec<IconId> {
        names.iter().map(|n| IconId::parse(n).unwrap()).collect()
    }

    #[test]
    fn index_tracks_latest_registration() {
        let manager = manager();
        manager
            .register_bundle("core", BundleSpec::from_names(["plus", "minus"]).unwrap())
            .unwrap();
        assert_eq!(manager.bundle_for_icon(&ids(&["plus"])[0]).as_deref(), Some("core"));

        manager
            .register_bundle("core", BundleSpec::from_names(["minus"]).unwrap())
            .unwrap();
        assert_eq!(manager.bundle_for_icon(&ids(&["plus"])[0]), None);
        assert_eq!(manager.state("core"), Some(LoadState::Unloaded));
    }

    #[test]
    fn cycles_and_unknown_dependencies_are_detected() {
        let manager = manager();
        manager
            .register_bundle("a", BundleSpec::default().with_dependencies(["b"]))
            .unwrap();
        manager
            .register_bundle("b", BundleSpec::default().with_dependencies(["c"]))
            .unwrap();
        manager
            .register_bundle("c", BundleSpec::default().with_dependencies(["a"]))
            .unwrap();
        assert_eq!(
            manager.check_graph("a"),
            Err(IconError::DependencyCycle(vec![
                "a".into(),
                "b".into(),
                "c".into(),
                "a".into()
            ]))
        );

        manager
            .register_bundle("d", BundleSpec::default().with_dependencies(["missing"]))
            .unwrap();
        assert_eq!(
            manager.check_graph("d"),
            Err(IconError::UnknownBundle("missing".into()))
        );
    }

    #[test]
    fn analysis_classifies_by_usage_share() {
        let manager = manager();
        let many: Vec<String> = (0..10).map(|i| format!("icon-{i}")).collect();
        manager
            .register_bundle(
                "wide",
                BundleSpec::from_names(many.iter().map(String::as_str)).unwrap(),
            )
            .unwrap();
        manager
            .register_bundle("core", BundleSpec::new(ids(&["plus", "minus", "close", "menu"])))
            .unwrap();
        manager
            .register_bundle("brands", BundleSpec::new(ids(&["github"])))
            .unwrap();

        for icon in ids(&["plus", "minus", "close", "icon-3"]) {
            manager.record_usage(&icon);
        }
        manager.record_usage(&ids(&["plus"])[0]);

        let report = manager.analyze();
        assert_eq!(report.critical, vec!["core"]);
        assert_eq!(report.unused, vec!["brands"]);
        assert_eq!(report.underutilized, vec!["wide"]);
        assert_eq!(manager.usage(&ids(&["plus"])[0]), 2);

        let core = report.bundles.iter().find(|b| b.name == "core").unwrap();
        assert_eq!(core.used_icons, 3);
        assert_eq!(core.uses, 4);
        assert!(matches!(
            report.recommendations[0],
            Recommendation::Remove { ref bundle, .. } if bundle == "brands"
        ));
    }

    #[test]
    fn loading_without_a_loader_leaves_bundle_unloaded() {
        let manager = manager();
        manager
            .register_bundle("core", BundleSpec::new(ids(&["plus"])))
            .unwrap();

        let result = tokio_test::block_on(manager.load_bundle("core"));
        assert!(matches!(result, Err(IconError::Unsupported(_))));
        assert_eq!(manager.state("core"), Some(LoadState::Unloaded));
        assert_eq!(manager.stats().loader_calls, 0);

        let unknown = tokio_test::block_on(manager.load_bundle("ghost"));
        assert_eq!(unknown, Err(IconError::UnknownBundle("ghost".into())));
    }
}
