//! Rendered page store with LRU eviction
//!
//! Holds completed page images keyed by [`RenderKey`]. The store is bounded
//! by two independent limits, an entry count and a total byte cost; when a
//! `put` would break either, least recently used entries are evicted until
//! both hold again.

use std::collections::{HashMap, VecDeque};

use folio_render::RenderedImage;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::key::{DocumentId, RenderKey};

/// A completed, cached page image
///
/// Immutable once created. Clones share the pixel buffer.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    image: RenderedImage,
    cost: usize,
}

impl CacheEntry {
    pub fn new(image: RenderedImage) -> Self {
        let cost = image.byte_cost();
        Self { image, cost }
    }

    pub fn image(&self) -> &RenderedImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Approximate memory cost in bytes (width x height x 4)
    pub fn cost(&self) -> usize {
        self.cost
    }

    /// Whether both entries hold the same pixel buffer
    pub fn same_image(&self, other: &CacheEntry) -> bool {
        self.image.ptr_eq(&other.image)
    }
}

/// Statistics about store usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently cached
    pub entry_count: usize,

    /// Maximum number of entries allowed
    pub entry_limit: usize,

    /// Total cost of cached entries (bytes)
    pub cost_used: usize,

    /// Maximum total cost allowed (bytes)
    pub cost_limit: usize,

    /// Number of lookups that found an entry
    pub hits: u64,

    /// Number of lookups that found nothing
    pub misses: u64,

    /// Number of entries evicted to make room
    pub evictions: u64,

    /// Number of full clears
    pub clears: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct StoreState {
    entries: HashMap<RenderKey, CacheEntry>,

    /// Most recently used at back, least recently used at front
    lru_queue: VecDeque<RenderKey>,

    cost_used: usize,
    max_entries: usize,
    max_cost: usize,
    stats: CacheStats,
}

impl StoreState {
    fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            cost_used: 0,
            max_entries: config.max_entries,
            max_cost: config.max_cost_bytes,
            stats: CacheStats {
                entry_limit: config.max_entries,
                cost_limit: config.max_cost_bytes,
                ..Default::default()
            },
        }
    }

    fn touch(&mut self, key: &RenderKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    fn take(&mut self, key: &RenderKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.cost_used = self.cost_used.saturating_sub(entry.cost);
        self.lru_queue.retain(|k| k != key);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<RenderKey> {
        let key = self.lru_queue.pop_front()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.cost_used = self.cost_used.saturating_sub(entry.cost);
            self.stats.evictions += 1;
        }
        Some(key)
    }

    /// Evict until one more entry of `incoming_cost` fits under both limits
    fn evict_to_fit(&mut self, incoming_cost: usize) {
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.max_entries
                || self.cost_used + incoming_cost > self.max_cost)
        {
            match self.evict_lru() {
                Some(key) => debug!(%key, "evicted page image"),
                None => break,
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.cost_used = self.cost_used;
    }
}

/// Page image store with LRU eviction
///
/// Thread-safe; every mutation goes through one mutex so cost accounting
/// never races. Share it behind an `Arc`.
///
/// # Example
///
/// ```
/// use folio_cache::{CacheConfig, CacheEntry, ImageStore, RenderKey};
/// use folio_render::{QualityMode, RenderedImage, RgbaImage};
///
/// let store = ImageStore::new(CacheConfig::default());
/// let key = RenderKey::new("report.pdf", 0, QualityMode::Preview);
///
/// store.put(key.clone(), CacheEntry::new(RenderedImage::new(RgbaImage::new(64, 64))));
///
/// if let Some(entry) = store.get(&key) {
///     println!("Cache hit! {}x{}", entry.width(), entry.height());
/// }
/// assert_eq!(store.total_cost(), 64 * 64 * 4);
/// ```
pub struct ImageStore {
    state: Mutex<StoreState>,
}

impl ImageStore {
    pub fn new(config: CacheConfig) -> Self {
        Self { state: Mutex::new(StoreState::new(&config)) }
    }

    /// Retrieve an entry, marking it most recently used
    pub fn get(&self, key: &RenderKey) -> Option<CacheEntry> {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get(key).cloned() {
            state.touch(key);
            state.stats.hits += 1;
            Some(entry)
        } else {
            state.stats.misses += 1;
            None
        }
    }

    /// Check for an entry without touching LRU order or statistics
    pub fn contains(&self, key: &RenderKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Store an entry, evicting least recently used entries as needed
    ///
    /// Returns `false` if the entry alone is larger than the cost limit (or
    /// the store allows no entries); such an entry is not cached.
    pub fn put(&self, key: RenderKey, entry: CacheEntry) -> bool {
        let mut state = self.state.lock();

        state.take(&key);

        if entry.cost > state.max_cost || state.max_entries == 0 {
            debug!(%key, cost = entry.cost, limit = state.max_cost, "page image too large to cache");
            state.sync_stats();
            return false;
        }

        state.evict_to_fit(entry.cost);

        state.cost_used += entry.cost;
        state.touch(&key);
        state.entries.insert(key, entry);
        state.sync_stats();
        true
    }

    /// Remove one entry
    pub fn remove(&self, key: &RenderKey) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let removed = state.take(key);
        state.sync_stats();
        removed
    }

    /// Remove every entry belonging to `document`
    ///
    /// Returns the number of entries removed.
    pub fn remove_document(&self, document: &DocumentId) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<RenderKey> =
            state.entries.keys().filter(|key| key.belongs_to(document)).cloned().collect();
        for key in &keys {
            state.take(key);
        }
        state.sync_stats();
        keys.len()
    }

    /// Remove everything unconditionally
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.lru_queue.clear();
        state.cost_used = 0;
        state.stats.clears += 1;
        state.sync_stats();
    }

    /// Total cost of cached entries in bytes
    pub fn total_cost(&self) -> usize {
        self.state.lock().cost_used
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

impl Default for ImageStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
