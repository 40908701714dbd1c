//! Folio Core Library
//!
//! Page image service for document viewers: on-demand page renders with
//! request deduplication, a bounded in-memory cache, cancellable batch
//! sessions with progress, and memory-pressure flushing.

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod service;

pub use batch::{BatchCompletion, BatchContext, BatchHandle, BatchId, BatchReport, BatchRequest};
pub use config::{PipelineConfig, DEFAULT_BATCH_CHUNK_SIZE};
pub use document::DocumentRegistry;
pub use error::{ServiceError, ServiceResult};
pub use service::{PageImageService, ServiceStats};

pub use folio_cache::{CacheEntry, CacheStats, DocumentId, MemoryPressure, RenderKey};
pub use folio_render::{QualityMode, RenderError};
pub use folio_scheduler::{ImageRequest, LoadingState, Priority, RenderOutcome, SchedulerStats};
