//! Swapping rendered icon content into host nodes

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashSet;
use serde::Serialize;
use sva_traits::{Attribute, ContentNode, HostError, HostTree, NodeId};

use crate::bundle::BundleManager;
use crate::cache::{CacheKey, RenderCache};
use crate::config::{EngineConfig, INJECTED_MARKER, INJECTING_MARKER, PROCESSED_MARKER};
use crate::content::parse_content;
use crate::error::{IconError, IconResult};
use crate::identifier::{IconId, ModifierTag, RenderOptions, normalize_modifiers};
use crate::registry::IconDefinition;
use crate::report::{ErrorReporter, FailureEvent, FailureSource};
use crate::resolver::NameResolver;
use crate::scanner::ScanMatch;

/// Outcome of one injection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionRecord {
    pub node: NodeId,
    /// Identifier found on the node
    pub requested: IconId,
    /// Identifier whose content was injected (the fallback when `from_fallback`)
    pub identifier: Option<IconId>,
    pub modifiers: Vec<ModifierTag>,
    pub success: bool,
    pub error: Option<IconError>,
    pub from_fallback: bool,
    /// The inserted content element
    pub content_node: Option<NodeId>,
    pub elapsed: Duration,
}

impl InjectionRecord {
    fn pending(node: NodeId, requested: &IconId, modifiers: &[ModifierTag]) -> Self {
        Self {
            node,
            requested: requested.clone(),
            identifier: None,
            modifiers: modifiers.to_vec(),
            success: false,
            error: None,
            from_fallback: false,
            content_node: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Short failure kind (`identifier_not_found`, ...) if the injection failed
    pub fn failure_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(IconError::kind)
    }

    pub fn is_already_processed(&self) -> bool {
        matches!(self.error, Some(IconError::AlreadyProcessed(_)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InjectorStats {
    pub injected: u64,
    pub failed: u64,
    pub already_processed: u64,
    pub fallbacks: u64,
}

/// Builds content nodes from resolved definitions and swaps them into the host
pub struct Injector {
    host: Arc<dyn HostTree>,
    resolver: Arc<NameResolver>,
    reporter: Arc<ErrorReporter>,
    bundles: Option<BundleManager>,
    prefix: String,
    base_class: String,
    injected: AtomicU64,
    failed: AtomicU64,
    already_processed: AtomicU64,
    fallbacks: AtomicU64,
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("prefix", &self.prefix)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Injector {
    pub fn new(
        host: Arc<dyn HostTree>,
        resolver: Arc<NameResolver>,
        reporter: Arc<ErrorReporter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            host,
            resolver,
            reporter,
            bundles: None,
            prefix: config.prefix.clone(),
            base_class: config.base_class().to_string(),
            injected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            already_processed: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Record per-icon usage in `bundles` after every successful injection
    pub fn with_bundles(mut self, bundles: BundleManager) -> Self {
        self.bundles = Some(bundles);
        self
    }

    pub fn resolver(&self) -> &Arc<NameResolver> {
        &self.resolver
    }

    fn cache(&self) -> &RenderCache {
        self.resolver.render_cache()
    }

    /// Inject the icon `identifier` into `node`.
    ///
    /// `modifiers` are brought into canonical form first; the rendered
    /// content, its size attributes and the record all use that form.
    ///
    /// Failures come back as records with `success == false`. In strict mode
    /// they are returned as errors instead, except `AlreadyProcessed`, which is
    /// always a record.
    pub fn inject(
        &self,
        node: NodeId,
        identifier: &IconId,
        modifiers: &[ModifierTag],
    ) -> IconResult<InjectionRecord> {
        let start = Instant::now();
        let canonical = normalize_modifiers(modifiers);
        let modifiers = canonical.as_slice();
        let mut record = InjectionRecord::pending(node, identifier, modifiers);

        if !self.host.is_attached(node) {
            return self.fail(record, IconError::NodeDetached(node), start);
        }
        if self.host.has_attr(node, PROCESSED_MARKER) {
            return Ok(self.already_processed(record, start));
        }
        if self.holds_injected_content(node) {
            self.host
                .set_attr(node, PROCESSED_MARKER, "")
                .map_err(|e| host_failure(node, e))?;
            return Ok(self.already_processed(record, start));
        }

        let resolved = match self.resolver.resolve_identifier(identifier) {
            Ok(resolved) => resolved,
            Err(error) => return self.fail(record, error, start),
        };
        let Some(definition) = resolved.definition else {
            let error = resolved
                .error
                .unwrap_or_else(|| IconError::IdentifierNotFound(identifier.to_string()));
            return self.fail(record, error, start);
        };
        record.from_fallback = resolved.from_fallback;

        let (definition, mut content) = match self.render(&definition, modifiers) {
            Ok(content) => (definition, content),
            Err(error) => match self.render_fallback(&definition, modifiers) {
                Some((fallback, content)) => {
                    tracing::debug!(node, identifier = %identifier, error = %error, "Falling back after invalid content");
                    record.from_fallback = true;
                    (fallback, content)
                }
                None => return self.fail(record, error, start),
            },
        };

        let original = self.host.attrs(node);
        self.decorate(&mut content, &original, definition.id(), modifiers);

        match self.swap(node, content) {
            Ok(content_node) => {
                record.identifier = Some(definition.id().clone());
                record.content_node = Some(content_node);
                record.success = true;
                record.elapsed = start.elapsed();
                self.injected.fetch_add(1, Ordering::Relaxed);
                if record.from_fallback {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(bundles) = &self.bundles {
                    bundles.record_usage(definition.id());
                }
                tracing::trace!(node, identifier = %definition.id(), content_node, "Injected icon");
                Ok(record)
            }
            Err(error) => self.fail(record, error, start),
        }
    }

    /// Inject a list of scan matches in order.
    ///
    /// Content for each distinct (identifier, modifiers) pair is rendered into the
    /// cache first, so repeated icons only pay for parsing and the swap.
    pub fn inject_batch(&self, matches: &[ScanMatch]) -> IconResult<Vec<InjectionRecord>> {
        self.prewarm(matches);
        matches
            .iter()
            .map(|found| self.inject(found.node, &found.identifier, &found.modifiers))
            .collect()
    }

    /// Render content for every distinct key in `matches` that is not cached yet
    pub fn prewarm(&self, matches: &[ScanMatch]) -> usize {
        let mut seen = AHashSet::new();
        let mut rendered = 0;
        for found in matches {
            let modifiers = normalize_modifiers(&found.modifiers);
            if !seen.insert((found.identifier.clone(), modifiers.clone())) {
                continue;
            }
            let Some(definition) = self.resolver.lookup(&found.identifier) else {
                continue;
            };
            let key = CacheKey::new(definition.id().clone(), &modifiers);
            if !self.cache().contains(&key) {
                let options = RenderOptions::from_modifiers(&modifiers);
                self.cache()
                    .insert(key, Arc::from(definition.render(&options)));
                rendered += 1;
            }
        }
        rendered
    }

    pub fn stats(&self) -> InjectorStats {
        InjectorStats {
            injected: self.injected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            already_processed: self.already_processed.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn render(
        &self,
        definition: &IconDefinition,
        modifiers: &[ModifierTag],
    ) -> IconResult<ContentNode> {
        let key = CacheKey::new(definition.id().clone(), modifiers);
        let markup = self.cache().get_or_render(&key, || {
            definition.render(&RenderOptions::from_modifiers(modifiers))
        });
        parse_content(definition.id().as_str(), &markup)
    }

    /// Retry once with the configured fallback, unless it is the icon that just failed
    fn render_fallback(
        &self,
        failed: &IconDefinition,
        modifiers: &[ModifierTag],
    ) -> Option<(Arc<IconDefinition>, ContentNode)> {
        let fallback_id = self.resolver.fallback()?;
        if fallback_id == failed.id() {
            return None;
        }
        let fallback = self.resolver.lookup(fallback_id)?;
        let content = self.render(&fallback, modifiers).ok()?;
        Some((fallback, content))
    }

    /// Merge the original node's preservable attributes and classes into
    /// `content` and apply accessibility defaults where absent
    fn decorate(
        &self,
        content: &mut ContentNode,
        original: &[Attribute],
        resolved: &IconId,
        modifiers: &[ModifierTag],
    ) {
        for attr in original {
            let name = attr.name.as_str();
            let preserved = name == "id"
                || name == "title"
                || name.starts_with("aria-")
                || (name.starts_with("data-") && !is_engine_marker(name));
            if preserved {
                content.set_attr(name, attr.value.clone());
            }
        }

        let original_classes = original
            .iter()
            .find(|attr| attr.name.as_str() == "class")
            .map(|attr| attr.value.as_str())
            .unwrap_or_default();
        let modifier_classes: Vec<String> = modifiers
            .iter()
            .map(|modifier| modifier.class_name(&self.prefix))
            .collect();
        content.add_classes(
            std::iter::once(self.base_class.as_str())
                .chain(
                    original_classes
                        .split_whitespace()
                        .filter(|class| class.starts_with(self.prefix.as_str())),
                )
                .chain(modifier_classes.iter().map(String::as_str)),
        );

        content.set_attr(INJECTED_MARKER, resolved.as_str());

        let labelled = ["aria-label", "aria-labelledby", "title"]
            .iter()
            .any(|name| content.attr(name).is_some_and(|value| !value.trim().is_empty()));
        if labelled {
            content.set_attr_if_absent("role", "img");
        } else {
            content.set_attr_if_absent("aria-hidden", "true");
        }
        content.set_attr_if_absent("focusable", "false");

        let size = modifiers.iter().rev().find_map(|modifier| match modifier {
            ModifierTag::Size(size) => Some(size.pixels()),
            _ => None,
        });
        if let Some(size) = size {
            content.set_attr_if_absent("width", size.to_string());
            content.set_attr_if_absent("height", size.to_string());
        }
    }

    /// Mark, swap, unmark. The processed marker is written before the tree
    /// changes so that notifications raised by the swap see it. A failed swap
    /// leaves the node as it was.
    fn swap(&self, node: NodeId, content: ContentNode) -> IconResult<NodeId> {
        self.host
            .set_attr(node, PROCESSED_MARKER, "")
            .map_err(|e| host_failure(node, e))?;
        self.host
            .set_attr(node, INJECTING_MARKER, "")
            .map_err(|e| host_failure(node, e))?;

        // `id` now lives on the content element
        let moved_id = self.host.attr(node, "id");
        let id_removed = match moved_id {
            Some(_) => self.host.remove_attr(node, "id"),
            None => Ok(()),
        };

        match id_removed.and_then(|()| self.host.replace_children(node, content)) {
            Ok(content_node) => {
                self.host
                    .remove_attr(node, INJECTING_MARKER)
                    .map_err(|e| host_failure(node, e))?;
                Ok(content_node)
            }
            Err(error) => {
                self.restore(node, moved_id.as_deref());
                Err(host_failure(node, error))
            }
        }
    }

    /// Undo the markers and the `id` move of a failed swap
    fn restore(&self, node: NodeId, moved_id: Option<&str>) {
        let mut undo = vec![
            self.host.remove_attr(node, INJECTING_MARKER),
            self.host.remove_attr(node, PROCESSED_MARKER),
        ];
        if let Some(id) = moved_id {
            if !self.host.has_attr(node, "id") {
                undo.push(self.host.set_attr(node, "id", id));
            }
        }
        for error in undo.into_iter().filter_map(Result::err) {
            tracing::warn!(node, error = %error, "Could not restore node after a failed swap");
        }
    }

    fn holds_injected_content(&self, node: NodeId) -> bool {
        self.host
            .children(node)
            .into_iter()
            .any(|child| self.host.has_attr(child, INJECTED_MARKER))
    }

    fn already_processed(&self, mut record: InjectionRecord, start: Instant) -> InjectionRecord {
        self.already_processed.fetch_add(1, Ordering::Relaxed);
        record.error = Some(IconError::AlreadyProcessed(record.node));
        record.elapsed = start.elapsed();
        record
    }

    fn fail(
        &self,
        mut record: InjectionRecord,
        error: IconError,
        start: Instant,
    ) -> IconResult<InjectionRecord> {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.reporter.report(
            FailureEvent::new(FailureSource::Injection, error.clone())
                .with_node(record.node)
                .with_identifier(record.requested.as_str()),
        );
        if self.resolver.is_strict() {
            return Err(error);
        }
        record.error = Some(error);
        record.elapsed = start.elapsed();
        Ok(record)
    }
}

fn is_engine_marker(name: &str) -> bool {
    matches!(name, PROCESSED_MARKER | INJECTING_MARKER | INJECTED_MARKER)
}

fn host_failure(node: NodeId, error: HostError) -> IconError {
    match error {
        HostError::NodeNotFound(_) | HostError::Detached(_) => IconError::NodeDetached(node),
        other => IconError::Host(other),
    }
}
