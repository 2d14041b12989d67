//! Icon definition registry
//!
//! Definitions live in an [`ArcSwap`]ed map: lookups are a single atomic load,
//! registrations copy the map and swap it in.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use arc_swap::ArcSwap;
use serde::Serialize;

use crate::error::IconResult;
use crate::identifier::{IconId, RenderOptions};

/// Pure content function of an icon
pub type RenderFn = Arc<dyn Fn(&RenderOptions) -> String + Send + Sync>;

/// Optional descriptive data shipped with a definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IconMetadata {
    pub category: Option<String>,
    pub keywords: Vec<String>,
}

/// An icon's registration name paired with its content function
#[derive(Clone)]
pub struct IconDefinition {
    name: String,
    id: IconId,
    render: RenderFn,
    metadata: IconMetadata,
}

impl IconDefinition {
    /// `name` may be hyphenated (`arrow-right`) or capitalized-concatenated (`ArrowRight`)
    pub fn new(
        name: impl Into<String>,
        render: impl Fn(&RenderOptions) -> String + Send + Sync + 'static,
    ) -> IconResult<Self> {
        let name = name.into();
        let id = IconId::from_name(&name)?;
        Ok(Self {
            name,
            id,
            render: Arc::new(render),
            metadata: IconMetadata::default(),
        })
    }

    /// A definition that always renders the same markup
    pub fn from_markup(name: impl Into<String>, markup: impl Into<String>) -> IconResult<Self> {
        let markup: String = markup.into();
        Self::new(name, move |_: &RenderOptions| markup.clone())
    }

    pub fn with_metadata(mut self, metadata: IconMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical identifier derived from the registration name
    pub fn id(&self) -> &IconId {
        &self.id
    }

    pub fn metadata(&self) -> &IconMetadata {
        &self.metadata
    }

    pub fn render(&self, options: &RenderOptions) -> String {
        (self.render)(options)
    }
}

impl fmt::Debug for IconDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IconDefinition")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub definitions: usize,
    pub hits: u64,
    pub misses: u64,
}

impl RegistryStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free icon registry keyed by canonical identifier.
///
/// `ArrowRight`, `arrowRight` and `arrow-right` all register under
/// `arrow-right`; the registration name is kept on the definition.
pub struct IconRegistry {
    definitions: ArcSwap<AHashMap<IconId, Arc<IconDefinition>>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl Default for IconRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IconRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IconRegistry")
            .field("definitions", &self.len())
            .finish()
    }
}

impl IconRegistry {
    pub fn new() -> Self {
        Self {
            definitions: ArcSwap::from_pointee(AHashMap::with_capacity(256)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Register (or overwrite) a definition, returning the one it replaced
    pub fn register(&self, definition: IconDefinition) -> Option<Arc<IconDefinition>> {
        let definition = Arc::new(definition);
        let mut previous = None;
        self.definitions.rcu(|current| {
            let mut next = AHashMap::clone(current);
            previous = next.insert(definition.id.clone(), Arc::clone(&definition));
            next
        });
        previous
    }

    /// Register many definitions with a single swap. Returns how many were stored.
    pub fn register_all(&self, definitions: impl IntoIterator<Item = IconDefinition>) -> usize {
        let definitions: Vec<Arc<IconDefinition>> = definitions.into_iter().map(Arc::new).collect();
        if definitions.is_empty() {
            return 0;
        }
        self.definitions.rcu(|current| {
            let mut next = AHashMap::clone(current);
            for definition in &definitions {
                next.insert(definition.id.clone(), Arc::clone(definition));
            }
            next
        });
        definitions.len()
    }

    pub fn get(&self, id: &IconId) -> Option<Arc<IconDefinition>> {
        match self.definitions.load().get(id) {
            Some(definition) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(definition))
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// No stats recorded
    pub fn contains(&self, id: &IconId) -> bool {
        self.definitions.load().contains_key(id)
    }

    pub fn remove(&self, id: &IconId) -> Option<Arc<IconDefinition>> {
        let mut removed = None;
        self.definitions.rcu(|current| {
            let mut next = AHashMap::clone(current);
            removed = next.remove(id);
            next
        });
        removed
    }

    pub fn clear(&self) {
        self.definitions.store(Arc::new(AHashMap::new()));
    }

    pub fn len(&self) -> usize {
        self.definitions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> Vec<IconId> {
        let mut ids: Vec<IconId> = self.definitions.load().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            definitions: self.len(),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
        }
    }
}
