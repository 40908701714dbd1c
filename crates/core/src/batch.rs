//! Batch sessions
//!
//! A batch renders many pages of one document under a single cancellable
//! handle. Pages are requested in fixed-size chunks; results stream back as
//! they complete and one progress event follows each finished chunk.
//!
//! Cancelling a batch stops it at the next chunk boundary and detaches the
//! requests of the current chunk. Renders other callers are waiting on keep
//! running.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use folio_cache::{CacheEntry, DocumentId};
use folio_render::{QualityMode, RenderError};
use folio_scheduler::{CancellationToken, ImageRequest, Priority, RenderOutcome};
use futures::channel::mpsc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Identifies a batch session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BatchId(pub(crate) u64);

impl BatchId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// The caller a batch belongs to
///
/// Starting a batch cancels any earlier batch with the same context for the
/// same document, e.g. a thumbnail strip restarting after a scroll.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchContext(Arc<str>);

impl BatchContext {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchContext {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A batch to start
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub document: DocumentId,
    pub pages: Vec<usize>,
    pub mode: QualityMode,
    pub priority: Priority,
    pub context: BatchContext,
    /// Overrides the configured chunk size
    pub chunk_size: Option<usize>,
}

impl BatchRequest {
    /// Background-priority batch in the default context
    pub fn new(document: impl Into<DocumentId>, pages: impl IntoIterator<Item = usize>, mode: QualityMode) -> Self {
        Self {
            document: document.into(),
            pages: pages.into_iter().collect(),
            mode,
            priority: Priority::Background,
            context: BatchContext::default(),
            chunk_size: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: BatchContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

/// Final state of a batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub id: BatchId,
    /// Number of distinct pages in the batch
    pub total: usize,
    /// Terminal result per page. Pages never reached are absent.
    pub outcomes: BTreeMap<usize, RenderOutcome>,
    pub cancelled: bool,
}

impl BatchReport {
    fn empty(id: BatchId, total: usize, cancelled: bool) -> Self {
        Self { id, total, outcomes: BTreeMap::new(), cancelled }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_err()).count()
    }

    /// Every page reached a terminal result
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.outcomes.len() == self.total
    }

    pub fn entry(&self, page: usize) -> Option<&CacheEntry> {
        self.outcomes.get(&page).and_then(|o| o.as_ref().ok())
    }

    pub fn error(&self, page: usize) -> Option<&RenderError> {
        self.outcomes.get(&page).and_then(|o| o.as_ref().err())
    }
}

/// Resolves to the [`BatchReport`] once the batch stops
pub struct BatchCompletion {
    id: BatchId,
    total: usize,
    handle: JoinHandle<BatchReport>,
}

impl Future for BatchCompletion {
    type Output = BatchReport;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(report)) => Poll::Ready(report),
            Poll::Ready(Err(join_error)) => {
                error!(batch = %self.id, %join_error, "batch driver stopped unexpectedly");
                Poll::Ready(BatchReport::empty(self.id, self.total, true))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Handle to a running batch
///
/// The streams end when the batch completes or is cancelled. Dropping the
/// handle does not cancel the batch.
pub struct BatchHandle {
    id: BatchId,
    token: CancellationToken,
    /// `completed / total` after each chunk, strictly increasing
    pub progress: mpsc::UnboundedReceiver<f64>,
    /// `(page, outcome)` as each page completes
    pub results: mpsc::UnboundedReceiver<(usize, RenderOutcome)>,
    pub completion: BatchCompletion,
}

impl BatchHandle {
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Stop the batch. No further events are emitted.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the final report, discarding any unread events
    pub async fn finish(self) -> BatchReport {
        self.completion.await
    }
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Everything the driver needs to run one batch
pub(crate) struct BatchPlan {
    pub id: BatchId,
    pub document: DocumentId,
    pub pages: Vec<usize>,
    pub chunk_size: usize,
    pub token: CancellationToken,
}

impl BatchPlan {
    /// Drop repeated pages, keeping first occurrences in order
    pub fn new(id: BatchId, document: DocumentId, pages: Vec<usize>, chunk_size: usize, token: CancellationToken) -> Self {
        let mut seen = HashSet::with_capacity(pages.len());
        let pages = pages.into_iter().filter(|page| seen.insert(*page)).collect();
        Self { id, document, pages, chunk_size: chunk_size.max(1), token }
    }
}

/// Spawn the batch driver and return its handle
///
/// `request` issues the request for one page. `on_finish` runs once the
/// driver stops, whatever the reason.
pub(crate) fn spawn_batch<R, F>(
    runtime: &tokio::runtime::Handle,
    plan: BatchPlan,
    request: R,
    on_finish: F,
) -> BatchHandle
where
    R: Fn(usize) -> ImageRequest + Send + 'static,
    F: FnOnce(&BatchReport) + Send + 'static,
{
    let (progress_tx, progress) = mpsc::unbounded();
    let (results_tx, results) = mpsc::unbounded();
    let id = plan.id;
    let total = plan.pages.len();
    let token = plan.token.clone();

    let handle = runtime.spawn(async move {
        let report = drive(plan, request, progress_tx, results_tx).await;
        on_finish(&report);
        report
    });

    BatchHandle { id, token, progress, results, completion: BatchCompletion { id, total, handle } }
}

async fn drive<R>(
    plan: BatchPlan,
    request: R,
    progress: mpsc::UnboundedSender<f64>,
    results: mpsc::UnboundedSender<(usize, RenderOutcome)>,
) -> BatchReport
where
    R: Fn(usize) -> ImageRequest,
{
    let total = plan.pages.len();
    let mut report = BatchReport::empty(plan.id, total, false);
    if total == 0 {
        return report;
    }

    info!(batch = %plan.id, document = %plan.document, pages = total, chunk = plan.chunk_size, "batch started");
    let mut completed = 0usize;

    for chunk in plan.pages.chunks(plan.chunk_size) {
        if plan.token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let mut pending: FuturesUnordered<_> = chunk
            .iter()
            .map(|&page| {
                let image = request(page);
                async move { (page, image.await) }
            })
            .collect();

        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = plan.token.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Some((page, outcome)) = pending.next() => {
                    if !emit(&plan.token, &results, (page, outcome.clone())) {
                        report.cancelled = true;
                        break;
                    }
                    if let Err(error) = &outcome {
                        debug!(batch = %plan.id, page, %error, "batch page failed");
                    }
                    report.outcomes.insert(page, outcome);
                }
            }
        }
        // Dropping unfinished requests detaches them
        drop(pending);

        completed += chunk.len();
        if report.cancelled || !emit(&plan.token, &progress, completed as f64 / total as f64) {
            report.cancelled = true;
            break;
        }
    }

    if report.cancelled {
        info!(batch = %plan.id, completed = report.outcomes.len(), total, "batch cancelled");
    } else {
        info!(batch = %plan.id, succeeded = report.succeeded(), failed = report.failed(), "batch finished");
    }
    report
}

/// Send `event` unless the batch was cancelled. Returns `false` if cancelled.
fn emit<T>(token: &CancellationToken, sink: &mpsc::UnboundedSender<T>, event: T) -> bool {
    if token.is_cancelled() {
        return false;
    }
    let _ = sink.unbounded_send(event);
    true
}
