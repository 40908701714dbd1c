//! Folio Cache Library
//!
//! In-memory store for rendered page images with count- and byte-bounded LRU
//! eviction, plus the memory monitor that flushes it under pressure.

pub mod config;
pub mod key;
pub mod pressure;
pub mod store;

pub use config::{CacheConfig, ConfigError};
pub use key::{DocumentId, RenderKey};
pub use pressure::{MemoryMonitor, MemoryPressure};
pub use store::{CacheEntry, CacheStats, ImageStore};
