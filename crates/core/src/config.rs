//! Pipeline configuration
//!
//! Aggregates the cache and scheduler limits with the batch and target-size
//! settings. Precedence when loading: file values, then environment
//! variables, then defaults for anything missing.

use std::fs;
use std::path::Path;

use folio_cache::config::{env_cost_mb, env_usize};
use folio_cache::{CacheConfig, ConfigError, MemoryPressure};
use folio_render::page::{DEFAULT_EXPORT_MAX_DIMENSION, DEFAULT_PREVIEW_MAX_DIMENSION};
use folio_render::QualityMode;
use folio_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Default number of pages requested per batch chunk
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 10;

/// Configuration for [`PageImageService`](crate::PageImageService)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    /// Pages requested per batch chunk; one progress event per chunk
    pub batch_chunk_size: usize,
    /// Longer side in pixels of preview renders
    pub preview_max_dimension: u32,
    /// Longer side in pixels of export renders
    pub export_max_dimension: u32,
    /// Pressure level at which the cache is flushed
    pub flush_level: MemoryPressure,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            preview_max_dimension: DEFAULT_PREVIEW_MAX_DIMENSION,
            export_max_dimension: DEFAULT_EXPORT_MAX_DIMENSION,
            flush_level: MemoryPressure::Critical,
        }
    }
}

impl PipelineConfig {
    /// Load from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `FOLIO_MAX_ENTRIES`: maximum cached images (default: 50)
    /// - `FOLIO_MAX_COST_MB`: maximum cached bytes in MB (default: 200)
    /// - `FOLIO_MAX_CONCURRENT_RENDERS`: renders executing at once (default: 3)
    /// - `FOLIO_BATCH_CHUNK_SIZE`: pages per batch chunk (default: 10)
    /// - `FOLIO_PREVIEW_MAX_DIMENSION`: preview longer side in px (default: 512)
    /// - `FOLIO_EXPORT_MAX_DIMENSION`: export longer side in px (default: 2048)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Load a JSON file, then apply environment overrides.
    ///
    /// Missing fields take their default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_usize("FOLIO_MAX_ENTRIES")? {
            self.cache.max_entries = value;
        }
        if let Some(bytes) = env_cost_mb("FOLIO_MAX_COST_MB")? {
            self.cache.max_cost_bytes = bytes;
        }
        if let Some(value) = env_usize("FOLIO_MAX_CONCURRENT_RENDERS")? {
            self.scheduler.max_concurrent_renders = value;
        }
        if let Some(value) = env_usize("FOLIO_BATCH_CHUNK_SIZE")? {
            self.batch_chunk_size = value;
        }
        if let Some(value) = env_u32("FOLIO_PREVIEW_MAX_DIMENSION")? {
            self.preview_max_dimension = value;
        }
        if let Some(value) = env_u32("FOLIO_EXPORT_MAX_DIMENSION")? {
            self.export_max_dimension = value;
        }
        Ok(self)
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_max_concurrent_renders(mut self, renders: usize) -> Self {
        self.scheduler.max_concurrent_renders = renders;
        self
    }

    pub fn with_batch_chunk_size(mut self, chunk_size: usize) -> Self {
        self.batch_chunk_size = chunk_size;
        self
    }

    pub fn with_flush_level(mut self, level: MemoryPressure) -> Self {
        self.flush_level = level;
        self
    }

    /// Longer side in pixels for `mode`
    pub fn max_dimension(&self, mode: QualityMode) -> u32 {
        match mode {
            QualityMode::Preview => self.preview_max_dimension,
            QualityMode::Export => self.export_max_dimension,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.scheduler.validate()?;
        for (key, value) in [
            ("batch_chunk_size", self.batch_chunk_size),
            ("preview_max_dimension", self.preview_max_dimension as usize),
            ("export_max_dimension", self.export_max_dimension as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue { key: key.to_string(), value: "0".to_string() });
            }
        }
        Ok(())
    }
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
    match env_usize(name)? {
        Some(value) => u32::try_from(value)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: name.to_string(), value: value.to_string() }),
        None => Ok(None),
    }
}
