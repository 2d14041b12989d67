//! Name resolution: classification token -> canonical identifier -> definition

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::RenderCache;
use crate::config::EngineConfig;
use crate::error::{IconError, IconResult};
use crate::identifier::IconId;
use crate::registry::{IconDefinition, IconRegistry};

/// Outcome of a resolution attempt
#[derive(Debug, Clone)]
pub struct ResolvedIcon {
    /// The definition to render, `None` when resolution failed
    pub definition: Option<Arc<IconDefinition>>,
    /// Requested identifier (prefix stripped), as written on the node
    pub identifier: String,
    /// The definition belongs to the configured fallback icon
    pub from_fallback: bool,
    pub error: Option<IconError>,
    pub elapsed: Duration,
}

impl ResolvedIcon {
    pub fn is_found(&self) -> bool {
        self.definition.is_some()
    }

    /// Canonical id of the definition that will be rendered
    pub fn resolved_id(&self) -> Option<&IconId> {
        self.definition.as_deref().map(IconDefinition::id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResolverStats {
    pub cached: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Resolves identifiers against the registry, caching successful lookups.
///
/// Registration goes through the resolver so that its own cache and the render
/// cache never serve content of a replaced definition.
pub struct NameResolver {
    registry: Arc<IconRegistry>,
    render_cache: Arc<RenderCache>,
    resolved: Mutex<AHashMap<IconId, Arc<IconDefinition>>>,
    prefix: String,
    fallback: Option<IconId>,
    strict: bool,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl std::fmt::Debug for NameResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameResolver")
            .field("prefix", &self.prefix)
            .field("fallback", &self.fallback)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl NameResolver {
    pub fn new(
        registry: Arc<IconRegistry>,
        render_cache: Arc<RenderCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            render_cache,
            resolved: Mutex::new(AHashMap::new()),
            prefix: config.prefix.clone(),
            fallback: config.fallback(),
            strict: config.strict_mode,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<IconRegistry> {
        &self.registry
    }

    pub fn render_cache(&self) -> &Arc<RenderCache> {
        &self.render_cache
    }

    pub fn fallback(&self) -> Option<&IconId> {
        self.fallback.as_ref()
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Resolve a classification token (`sva-icon-plus`) or a bare identifier (`plus`).
    ///
    /// # Errors
    /// Only in strict mode, when neither the token nor the fallback resolves.
    pub fn resolve(&self, token: &str) -> IconResult<ResolvedIcon> {
        let start = Instant::now();
        let raw = token.strip_prefix(self.prefix.as_str()).unwrap_or(token);
        let id = IconId::parse(raw);
        self.resolve_parsed(raw.to_string(), id, start)
    }

    /// Resolve an already validated identifier
    pub fn resolve_identifier(&self, id: &IconId) -> IconResult<ResolvedIcon> {
        self.resolve_parsed(id.to_string(), Ok(id.clone()), Instant::now())
    }

    fn resolve_parsed(
        &self,
        requested: String,
        id: IconResult<IconId>,
        start: Instant,
    ) -> IconResult<ResolvedIcon> {
        let failure = match &id {
            Ok(id) => match self.lookup(id) {
                Some(definition) => {
                    return Ok(ResolvedIcon {
                        definition: Some(definition),
                        identifier: requested,
                        from_fallback: false,
                        error: None,
                        elapsed: start.elapsed(),
                    });
                }
                None => IconError::IdentifierNotFound(id.to_string()),
            },
            Err(err) => err.clone(),
        };

        if let Some(fallback) = &self.fallback {
            let is_fallback = id.as_ref().is_ok_and(|id| id == fallback);
            if !is_fallback {
                if let Some(definition) = self.lookup(fallback) {
                    tracing::debug!(requested = %requested, fallback = %fallback, "Resolved icon through fallback");
                    return Ok(ResolvedIcon {
                        definition: Some(definition),
                        identifier: requested,
                        from_fallback: true,
                        error: None,
                        elapsed: start.elapsed(),
                    });
                }
            }
        }

        tracing::debug!(requested = %requested, error = %failure, "Icon resolution failed");
        if self.strict {
            return Err(failure);
        }
        Ok(ResolvedIcon {
            definition: None,
            identifier: requested,
            from_fallback: false,
            error: Some(failure),
            elapsed: start.elapsed(),
        })
    }

    /// Resolver cache, then the registry
    pub fn lookup(&self, id: &IconId) -> Option<Arc<IconDefinition>> {
        if let Some(definition) = self.resolved.lock().get(id).cloned() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(definition);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let definition = self.registry.get(id)?;
        self.resolved.lock().insert(id.clone(), Arc::clone(&definition));
        Some(definition)
    }

    /// Register a definition and drop any cached state for its identifier
    pub fn register(&self, definition: IconDefinition) -> IconId {
        let id = definition.id().clone();
        self.registry.register(definition);
        self.invalidate(&id);
        id
    }

    pub fn register_all(&self, definitions: impl IntoIterator<Item = IconDefinition>) -> usize {
        let definitions: Vec<IconDefinition> = definitions.into_iter().collect();
        let ids: Vec<IconId> = definitions.iter().map(|d| d.id().clone()).collect();
        let count = self.registry.register_all(definitions);
        for id in &ids {
            self.invalidate(id);
        }
        tracing::debug!(count, "Registered icon definitions");
        count
    }

    pub fn unregister(&self, id: &IconId) -> Option<Arc<IconDefinition>> {
        let removed = self.registry.remove(id)?;
        self.invalidate(id);
        Some(removed)
    }

    /// Empty the registry and both caches
    pub fn clear(&self) {
        self.registry.clear();
        self.resolved.lock().clear();
        self.render_cache.clear();
    }

    fn invalidate(&self, id: &IconId) {
        self.resolved.lock().remove(id);
        let dropped = self.render_cache.invalidate_icon(id);
        if dropped > 0 {
            tracing::trace!(identifier = %id, dropped, "Invalidated rendered content");
        }
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cached: self.resolved.lock().len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}
