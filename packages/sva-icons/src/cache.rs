//! Rendered content cache
//!
//! Bounded LRU keyed by identifier plus the canonical modifier set, shared by the
//! injector and the performance manager.

use std::mem;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::identifier::{IconId, ModifierTag, normalize_modifiers};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    id: IconId,
    modifiers: Vec<ModifierTag>,
}

impl CacheKey {
    /// Modifiers are stored in canonical form (see [`normalize_modifiers`]), so
    /// two keys are equal exactly when their modifiers render the same
    pub fn new(id: IconId, modifiers: &[ModifierTag]) -> Self {
        Self {
            id,
            modifiers: normalize_modifiers(modifiers),
        }
    }

    pub fn id(&self) -> &IconId {
        &self.id
    }

    pub fn modifiers(&self) -> &[ModifierTag] {
        &self.modifiers
    }

    fn estimated_size(&self) -> usize {
        mem::size_of::<Self>()
            + self.id.as_str().len()
            + self.modifiers.len() * mem::size_of::<ModifierTag>()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub estimated_memory_bytes: usize,
}

pub struct RenderCache {
    entries: Mutex<LruCache<CacheKey, Arc<str>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache")
            .field("entries", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl RenderCache {
    /// A zero capacity is treated as one
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up rendered content, refreshing its recency
    pub fn get(&self, key: &CacheKey) -> Option<Arc<str>> {
        let found = self.entries.lock().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Presence check that neither touches recency nor counts as a lookup
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn insert(&self, key: CacheKey, content: Arc<str>) {
        let displaced = self.entries.lock().push(key.clone(), content);
        if displaced.is_some_and(|(old_key, _)| old_key != key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return cached content, or render, store and return it.
    ///
    /// The lock is not held while `render` runs.
    pub fn get_or_render(&self, key: &CacheKey, render: impl FnOnce() -> String) -> Arc<str> {
        if let Some(content) = self.get(key) {
            return content;
        }
        let content: Arc<str> = Arc::from(render());
        self.insert(key.clone(), Arc::clone(&content));
        content
    }

    /// Drop every entry rendered for `id`, whatever its modifiers. Returns the number removed.
    pub fn invalidate_icon(&self, id: &IconId) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.id == *id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Change the capacity, evicting least recently used entries if it shrinks
    pub fn resize(&self, capacity: usize) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.resize(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN));
        let evicted = before.saturating_sub(entries.len());
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, capacity, estimated_memory_bytes) = {
            let entries = self.entries.lock();
            let memory = entries
                .iter()
                .map(|(key, content)| key.estimated_size() + content.len())
                .sum();
            (entries.len(), entries.cap().get(), memory)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries,
            capacity,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            estimated_memory_bytes,
        }
    }
}
