//! Memory pressure handling
//!
//! The monitor turns host low-memory signals into a full flush of the
//! [`ImageStore`]. There is no partial eviction under pressure. Renders
//! already in flight are unaffected and repopulate the store as they
//! complete.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::ImageStore;

/// Memory pressure level reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (> 90% utilization)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Classify `used` bytes against a `budget`. A zero budget counts as
    /// critical.
    pub fn from_usage(used: u64, budget: u64) -> Self {
        if budget == 0 {
            return MemoryPressure::Critical;
        }
        Self::from_utilization(used as f64 / budget as f64)
    }
}

/// Flushes the image store when the host reports memory pressure
pub struct MemoryMonitor {
    store: Arc<ImageStore>,
    flush_level: MemoryPressure,
    flushes: AtomicU64,
}

impl MemoryMonitor {
    /// Monitor that flushes on [`MemoryPressure::Critical`]
    pub fn new(store: Arc<ImageStore>) -> Self {
        Self::with_flush_level(store, MemoryPressure::Critical)
    }

    /// Monitor that flushes once pressure reaches `flush_level`
    pub fn with_flush_level(store: Arc<ImageStore>, flush_level: MemoryPressure) -> Self {
        Self { store, flush_level, flushes: AtomicU64::new(0) }
    }

    pub fn flush_level(&self) -> MemoryPressure {
        self.flush_level
    }

    /// Host low-memory signal: drop every cached image
    pub fn on_memory_pressure(&self) {
        let released = self.store.total_cost();
        let entries = self.store.len();
        self.store.clear();
        self.flushes.fetch_add(1, Ordering::Relaxed);
        warn!(entries, released_bytes = released, "memory pressure: flushed page image cache");
    }

    /// Report a pressure level. Flushes and returns `true` when the level is
    /// at or above the flush level.
    pub fn observe(&self, level: MemoryPressure) -> bool {
        if level >= self.flush_level {
            self.on_memory_pressure();
            true
        } else {
            debug!(?level, "memory pressure below flush level");
            false
        }
    }

    /// Report process memory usage against a budget
    pub fn observe_usage(&self, used: u64, budget: u64) -> MemoryPressure {
        let level = MemoryPressure::from_usage(used, budget);
        self.observe(level);
        level
    }

    /// Number of flushes performed so far
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Forward pressure signals from a channel until every sender is dropped
    ///
    /// Must be called from within a Tokio runtime.
    pub fn listen(self: Arc<Self>, mut signals: mpsc::Receiver<MemoryPressure>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(level) = signals.recv().await {
                self.observe(level);
            }
            debug!("memory pressure channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, CacheEntry, RenderKey};
    use folio_render::{QualityMode, RenderedImage, RgbaImage};

    fn filled_store(pages: usize) -> Arc<ImageStore> {
        let store = Arc::new(ImageStore::new(CacheConfig::default()));
        for page in 0..pages {
            store.put(
                RenderKey::new("doc", page, QualityMode::Preview),
                CacheEntry::new(RenderedImage::new(RgbaImage::new(16, 16))),
            );
        }
        store
    }

    #[test]
    fn test_pressure_from_utilization() {
        assert_eq!(MemoryPressure::from_utilization(0.1), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(0.6), MemoryPressure::Moderate);
        assert_eq!(MemoryPressure::from_utilization(0.8), MemoryPressure::High);
        assert_eq!(MemoryPressure::from_utilization(0.95), MemoryPressure::Critical);
        assert_eq!(MemoryPressure::from_usage(10, 0), MemoryPressure::Critical);
    }

    #[test]
    fn test_on_memory_pressure_flushes_everything() {
        let store = filled_store(5);
        let monitor = MemoryMonitor::new(store.clone());

        monitor.on_memory_pressure();

        assert!(store.is_empty());
        assert_eq!(store.total_cost(), 0);
        assert!(store.get(&RenderKey::new("doc", 0, QualityMode::Preview)).is_none());
        assert_eq!(monitor.flush_count(), 1);
    }

    #[test]
    fn test_observe_respects_flush_level() {
        let store = filled_store(3);
        let monitor = MemoryMonitor::with_flush_level(store.clone(), MemoryPressure::High);

        assert!(!monitor.observe(MemoryPressure::Moderate));
        assert_eq!(store.len(), 3);

        assert!(monitor.observe(MemoryPressure::High));
        assert!(store.is_empty());
    }

    #[test]
    fn test_observe_usage() {
        let store = filled_store(2);
        let monitor = MemoryMonitor::new(store.clone());

        assert_eq!(monitor.observe_usage(40, 100), MemoryPressure::Low);
        assert_eq!(store.len(), 2);

        assert_eq!(monitor.observe_usage(99, 100), MemoryPressure::Critical);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_listen_forwards_signals() {
        let store = filled_store(4);
        let monitor = Arc::new(MemoryMonitor::new(store.clone()));
        let (tx, rx) = mpsc::channel(4);

        let handle = monitor.clone().listen(rx);
        tx.send(MemoryPressure::Low).await.unwrap();
        tx.send(MemoryPressure::Critical).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(store.is_empty());
        assert_eq!(monitor.flush_count(), 1);
    }
}
