//! Page image service
//!
//! The facade the UI and export code talk to. Owns the image store, the
//! render scheduler, the memory monitor, the open documents and the batch
//! sessions. Nothing here is global; construct one service per process (or
//! per window) and clone it freely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use folio_cache::{CacheStats, DocumentId, ImageStore, MemoryMonitor, MemoryPressure, RenderKey};
use folio_render::{DocumentSource, PageRenderer, QualityMode, RenderError, TargetSize};
use folio_scheduler::{
    CancellationRegistry, CancellationToken, ImageRequest, LoadingState, Priority, RenderExecutor,
    RenderScheduler, SchedulerStats,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::batch::{spawn_batch, BatchContext, BatchHandle, BatchId, BatchPlan, BatchRequest};
use crate::config::PipelineConfig;
use crate::document::DocumentRegistry;
use crate::error::ServiceResult;

/// Combined pipeline statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
    pub open_documents: usize,
    pub active_batches: usize,
    pub memory_flushes: u64,
}

/// Batches are replaced per document and caller context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchSlot {
    document: DocumentId,
    context: BatchContext,
}

struct ActiveBatch {
    slot: BatchSlot,
    token: CancellationToken,
}

struct ServiceInner {
    config: PipelineConfig,
    store: Arc<ImageStore>,
    scheduler: RenderScheduler,
    monitor: MemoryMonitor,
    documents: Arc<DocumentRegistry>,
    slots: CancellationRegistry<BatchSlot>,
    batches: Mutex<HashMap<BatchId, ActiveBatch>>,
    next_batch_id: AtomicU64,
    runtime: Handle,
}

impl ServiceInner {
    fn request_image(&self, key: RenderKey, priority: Priority) -> ImageRequest {
        if let Err(error) = self.documents.check_page(&key.document, key.page) {
            return ImageRequest::failed(key, error);
        }
        self.scheduler.request(key, priority)
    }

    fn finish_batch(&self, id: BatchId) {
        if let Some(batch) = self.batches.lock().remove(&id) {
            self.slots.release(&batch.slot, &batch.token);
        }
    }
}

/// Asynchronous page image pipeline
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use folio_core::{PageImageService, PipelineConfig};
/// use folio_render::{QualityMode, SyntheticDocument, SyntheticRenderer};
/// use folio_scheduler::Priority;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = PageImageService::new(PipelineConfig::default(), Arc::new(SyntheticRenderer::new()))?;
/// service.open_document("report.pdf", Arc::new(SyntheticDocument::letter(12)));
///
/// let page = service
///     .request_image("report.pdf", 0, QualityMode::Preview, Priority::Interactive)
///     .await?;
/// println!("{}x{}", page.width(), page.height());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PageImageService {
    inner: Arc<ServiceInner>,
}

impl PageImageService {
    /// Create a service running renders on the current Tokio runtime
    pub fn new(config: PipelineConfig, renderer: Arc<dyn PageRenderer>) -> ServiceResult<Self> {
        let runtime = Handle::try_current().map_err(folio_scheduler::SchedulerError::from)?;
        Self::with_runtime(config, renderer, runtime)
    }

    /// Create a service running renders on `runtime`
    pub fn with_runtime(
        config: PipelineConfig,
        renderer: Arc<dyn PageRenderer>,
        runtime: Handle,
    ) -> ServiceResult<Self> {
        config.validate()?;

        let store = Arc::new(ImageStore::new(config.cache));
        let documents = Arc::new(DocumentRegistry::new());
        let executor = render_executor(documents.clone(), renderer, config.clone());
        let scheduler =
            RenderScheduler::with_runtime(store.clone(), executor, config.scheduler, runtime.clone());
        let monitor = MemoryMonitor::with_flush_level(store.clone(), config.flush_level);

        info!(
            max_entries = config.cache.max_entries,
            max_cost_mb = config.cache.max_cost_mb(),
            max_concurrent_renders = config.scheduler.max_concurrent_renders,
            "page image service started"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                store,
                scheduler,
                monitor,
                documents,
                slots: CancellationRegistry::new(),
                batches: Mutex::new(HashMap::new()),
                next_batch_id: AtomicU64::new(1),
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Make a document available for rendering
    ///
    /// Re-opening an id that is already open replaces its source and drops
    /// everything cached or in flight for the old one.
    pub fn open_document(&self, id: impl Into<DocumentId>, source: Arc<dyn DocumentSource>) {
        let id = id.into();
        let pages = source.page_count();
        if self.inner.documents.open(id.clone(), source).is_some() {
            self.drop_document_state(&id);
        }
        info!(document = %id, pages, "document opened");
    }

    /// Clear a document and stop serving it. Returns `true` if it was open.
    pub fn close_document(&self, id: impl Into<DocumentId>) -> bool {
        let id = id.into();
        self.drop_document_state(&id);
        let was_open = self.inner.documents.close(&id);
        if was_open {
            info!(document = %id, "document closed");
        }
        was_open
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.inner.documents.is_open(id)
    }

    /// Request the image of one page
    ///
    /// Pages of unknown documents and out-of-range pages fail immediately.
    pub fn request_image(
        &self,
        document: impl Into<DocumentId>,
        page: usize,
        mode: QualityMode,
        priority: Priority,
    ) -> ImageRequest {
        self.inner.request_image(RenderKey::new(document, page, mode), priority)
    }

    /// Render `pages` as a background batch in the default context
    pub fn request_batch(
        &self,
        document: impl Into<DocumentId>,
        pages: impl IntoIterator<Item = usize>,
        mode: QualityMode,
    ) -> BatchHandle {
        self.start_batch(BatchRequest::new(document, pages, mode))
    }

    /// Start a batch session
    ///
    /// Cancels any running batch with the same document and context.
    pub fn start_batch(&self, request: BatchRequest) -> BatchHandle {
        let id = BatchId(self.inner.next_batch_id.fetch_add(1, Ordering::Relaxed));
        let slot = BatchSlot { document: request.document.clone(), context: request.context.clone() };
        let token = self.inner.slots.register(slot.clone());
        self.inner.batches.lock().insert(id, ActiveBatch { slot, token: token.clone() });

        let chunk_size = request.chunk_size.unwrap_or(self.inner.config.batch_chunk_size);
        debug!(batch = %id, document = %request.document, context = %request.context, "starting batch");
        let plan = BatchPlan::new(id, request.document.clone(), request.pages, chunk_size, token);

        let inner = Arc::clone(&self.inner);
        let finisher = Arc::clone(&self.inner);
        let (document, mode, priority) = (request.document, request.mode, request.priority);
        spawn_batch(
            &self.inner.runtime,
            plan,
            move |page| inner.request_image(RenderKey::new(document.clone(), page, mode), priority),
            move |report| finisher.finish_batch(report.id),
        )
    }

    /// Cancel a batch. Returns `true` if it was still running.
    pub fn cancel_batch(&self, id: BatchId) -> bool {
        match self.inner.batches.lock().get(&id) {
            Some(batch) => {
                batch.token.cancel();
                debug!(batch = %id, "batch cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop every cached image, in-flight render and batch of `document`
    ///
    /// The document stays open; later requests render again.
    pub fn clear_document(&self, document: impl Into<DocumentId>) {
        let document = document.into();
        self.drop_document_state(&document);
    }

    fn drop_document_state(&self, document: &DocumentId) {
        let batches = self.inner.slots.cancel_where(|slot| &slot.document == document);
        let tasks = self.inner.scheduler.cancel_document(document);
        let entries = self.inner.store.remove_document(document);
        info!(%document, batches, tasks, entries, "document cleared");
    }

    /// Host low-memory signal: flush the whole cache
    pub fn on_memory_pressure(&self) {
        self.inner.monitor.on_memory_pressure();
    }

    /// Report a graded pressure level. Returns `true` if the cache was flushed.
    pub fn observe_memory_pressure(&self, level: MemoryPressure) -> bool {
        self.inner.monitor.observe(level)
    }

    pub fn loading_state(&self, document: impl Into<DocumentId>, page: usize, mode: QualityMode) -> LoadingState {
        self.inner.scheduler.loading_state(&RenderKey::new(document, page, mode))
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.inner.scheduler
    }

    pub fn active_batches(&self) -> usize {
        self.inner.batches.lock().len()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.inner.store.stats(),
            scheduler: self.inner.scheduler.stats(),
            open_documents: self.inner.documents.len(),
            active_batches: self.active_batches(),
            memory_flushes: self.inner.monitor.flush_count(),
        }
    }
}

impl std::fmt::Debug for PageImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImageService").field("stats", &self.stats()).finish()
    }
}

/// Build the scheduler callback: look up the page, validate its bounds, pick
/// the target size for the mode and call the renderer.
fn render_executor(
    documents: Arc<DocumentRegistry>,
    renderer: Arc<dyn PageRenderer>,
    config: PipelineConfig,
) -> RenderExecutor {
    Arc::new(move |key: &RenderKey, token: &CancellationToken| {
        let source = documents
            .get(&key.document)
            .ok_or_else(|| RenderError::DocumentClosed(key.document.to_string()))?;
        let page = source.page(key.page)?;
        page.bounds.validate(key.page)?;
        if token.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let target = TargetSize::fit(page.bounds, config.max_dimension(key.mode));
        renderer.render(&page, target, key.mode)
    })
}
