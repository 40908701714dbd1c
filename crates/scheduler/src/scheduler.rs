//! Render scheduler
//!
//! Turns image requests into at most one in-flight render per key, admits
//! queued renders by priority up to a concurrency limit, and publishes
//! successful results to the [`ImageStore`] before any waiter observes them.
//!
//! Lock order is scheduler state, then store. The store is never locked
//! first while the scheduler lock is wanted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use folio_cache::{CacheEntry, DocumentId, ImageStore, RenderKey};
use folio_render::{RenderError, RenderResult, RenderedImage};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::priority::{AdmissionQueue, Priority};
use crate::request::ImageRequest;
use crate::task::{RenderOutcome, RenderTask, TaskId, TaskState, WaiterId};
use crate::worker::{run_render, RenderExecutor, SchedulerConfig};

/// Errors constructing a scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No Tokio runtime is available to run renders on
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Loading state of a key, for UI placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingState {
    /// Not cached, not in flight, no recorded failure
    Idle,
    /// A render is queued or running
    Pending,
    /// Cached and available
    Ready,
    /// The last render failed and nothing has been requested since
    Failed,
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Total requests received
    pub requests: u64,
    /// Requests answered from the store
    pub cache_hits: u64,
    /// Requests that attached to an existing task
    pub deduplicated: u64,
    /// Renders handed to the executor
    pub renders_started: u64,
    /// Renders that succeeded and were published
    pub renders_completed: u64,
    /// Renders that failed
    pub renders_failed: u64,
    /// Renders whose result nobody wanted
    pub renders_discarded: u64,
    /// Tasks dropped before they started
    pub tasks_dropped: u64,
    /// Renders executing now
    pub active: usize,
    /// Tasks waiting for a slot
    pub queued: usize,
}

struct Launch {
    key: RenderKey,
    task_id: TaskId,
    token: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<RenderKey, RenderTask>,
    queue: AdmissionQueue,
    active: usize,
    failed: HashSet<RenderKey>,
    next_task_id: TaskId,
    next_waiter_id: WaiterId,
    stats: SchedulerStats,
}

impl SchedulerState {
    /// Move queued tasks to running while slots are free
    fn admit(&mut self, limit: usize) -> Vec<Launch> {
        let mut launches = Vec::new();
        while self.active < limit {
            let Some(next) = self.queue.pop() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&next.key) else {
                continue;
            };
            // Stale ticket: promoted, restarted or replaced
            if task.id != next.task_id || task.state != TaskState::Queued || task.priority != next.priority {
                continue;
            }
            task.state = TaskState::Running;
            self.active += 1;
            self.stats.renders_started += 1;
            trace!(key = %task.key, priority = %task.priority, "admitting render");
            launches.push(Launch { key: next.key, task_id: task.id, token: task.token.clone() });
        }
        launches
    }

    fn queued(&self) -> usize {
        self.tasks.values().filter(|t| t.state == TaskState::Queued).count()
    }
}

pub(crate) struct Shared {
    store: Arc<ImageStore>,
    executor: RenderExecutor,
    runtime: Handle,
    max_concurrent: usize,
    state: Mutex<SchedulerState>,
}

impl Shared {
    fn launch(self: &Arc<Self>, launches: Vec<Launch>) {
        for launch in launches {
            let shared = Arc::clone(self);
            self.runtime.spawn_blocking(move || {
                let result = run_render(&shared.executor, &launch.key, &launch.token);
                shared.finish(launch, result);
            });
        }
    }

    fn finish(self: &Arc<Self>, launch: Launch, result: RenderResult<RenderedImage>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.active -= 1;

        let mut delivery: Option<(RenderTask, RenderOutcome)> = None;
        let owned = matches!(state.tasks.get(&launch.key), Some(task) if task.id == launch.task_id);

        if !owned {
            // Orphaned by cancel_document
            state.stats.renders_discarded += 1;
            debug!(key = %launch.key, "discarding render for orphaned task");
        } else if let Some(task) = state.tasks.get_mut(&launch.key) {
            match result {
                _ if !task.has_waiters() => {
                    state.stats.renders_discarded += 1;
                    debug!(key = %launch.key, "no waiters left, discarding render");
                    state.tasks.remove(&launch.key);
                }
                Err(RenderError::Cancelled) if task.reattached => {
                    // The render saw a cancellation that a later waiter undid
                    task.reattached = false;
                    task.token.reset();
                    task.state = TaskState::Queued;
                    state.queue.push(launch.key.clone(), task.id, task.priority);
                    debug!(key = %launch.key, "re-queueing render for re-attached waiter");
                }
                Ok(image) => {
                    let entry = CacheEntry::new(image);
                    if !self.store.put(launch.key.clone(), entry.clone()) {
                        debug!(key = %launch.key, cost = entry.cost(), "image exceeds cache limits, not cached");
                    }
                    state.stats.renders_completed += 1;
                    if let Some(task) = state.tasks.remove(&launch.key) {
                        delivery = Some((task, Ok(entry)));
                    }
                }
                Err(error) => {
                    if !error.is_cancelled() {
                        state.failed.insert(launch.key.clone());
                        state.stats.renders_failed += 1;
                        warn!(key = %launch.key, %error, "render failed");
                    }
                    if let Some(task) = state.tasks.remove(&launch.key) {
                        delivery = Some((task, Err(error)));
                    }
                }
            }
        }

        let launches = state.admit(self.max_concurrent);
        drop(guard);

        if let Some((task, outcome)) = delivery {
            let delivered = task.resolve(outcome);
            trace!(key = %launch.key, delivered, "render delivered");
        }
        self.launch(launches);
    }

    /// Remove one waiter from a task
    pub(crate) fn detach(&self, key: &RenderKey, task_id: TaskId, waiter_id: WaiterId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(task) = state.tasks.get_mut(key) else {
            return;
        };
        if task.id != task_id || !task.detach(waiter_id) || task.has_waiters() {
            return;
        }
        match task.state {
            TaskState::Queued => {
                state.tasks.remove(key);
                state.stats.tasks_dropped += 1;
                debug!(%key, "last waiter left, dropping queued render");
            }
            TaskState::Running => {
                task.token.cancel();
                debug!(%key, "last waiter left, cancelling running render");
            }
        }
    }
}

/// Deduplicating, priority-ordered render scheduler
///
/// Cheap to clone; clones share the same task table.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use folio_cache::{ImageStore, RenderKey};
/// use folio_render::{QualityMode, RenderResult, RenderedImage, RgbaImage};
/// use folio_scheduler::{CancellationToken, Priority, RenderExecutor, RenderScheduler, SchedulerConfig};
///
/// fn render(_key: &RenderKey, _token: &CancellationToken) -> RenderResult<RenderedImage> {
///     Ok(RenderedImage::new(RgbaImage::new(8, 8)))
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(ImageStore::default());
/// let executor: RenderExecutor = Arc::new(render);
/// let scheduler = RenderScheduler::new(store, executor, SchedulerConfig::default())?;
///
/// let entry = scheduler
///     .request(RenderKey::new("doc", 0, QualityMode::Preview), Priority::Interactive)
///     .await?;
/// assert_eq!(entry.width(), 8);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RenderScheduler {
    shared: Arc<Shared>,
}

impl RenderScheduler {
    /// Create a scheduler that runs renders on the current Tokio runtime
    pub fn new(
        store: Arc<ImageStore>,
        executor: RenderExecutor,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        Ok(Self::with_runtime(store, executor, config, Handle::try_current()?))
    }

    /// Create a scheduler that runs renders on `runtime`
    pub fn with_runtime(
        store: Arc<ImageStore>,
        executor: RenderExecutor,
        config: SchedulerConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                executor,
                runtime,
                max_concurrent: config.max_concurrent_renders.max(1),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.shared.store
    }

    /// Request the image for `key`
    ///
    /// A cached image resolves immediately. Otherwise the caller joins the
    /// in-flight render for `key`, or a new one is queued.
    pub fn request(&self, key: RenderKey, priority: Priority) -> ImageRequest {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        state.stats.requests += 1;
        state.failed.remove(&key);

        if let Some(entry) = self.shared.store.get(&key) {
            state.stats.cache_hits += 1;
            return ImageRequest::ready(key, Ok(entry));
        }

        let waiter_id = state.next_waiter_id;
        state.next_waiter_id += 1;

        if let Some(task) = state.tasks.get_mut(&key) {
            let receiver = task.attach(waiter_id);
            if task.token.is_cancelled() {
                task.token.reset();
                task.reattached = true;
                debug!(%key, "re-attached to abandoned render");
            }
            if priority > task.priority && task.state == TaskState::Queued {
                task.priority = priority;
                state.queue.push(key.clone(), task.id, priority);
                debug!(%key, %priority, "promoted queued render");
            }
            let task_id = task.id;
            state.stats.deduplicated += 1;
            return ImageRequest::waiting(key, receiver, Arc::clone(&self.shared), task_id, waiter_id);
        }

        let task_id = state.next_task_id;
        state.next_task_id += 1;
        let mut task = RenderTask::new(task_id, key.clone(), priority);
        let receiver = task.attach(waiter_id);
        state.tasks.insert(key.clone(), task);
        state.queue.push(key.clone(), task_id, priority);
        trace!(%key, %priority, "queued render");

        let launches = state.admit(self.shared.max_concurrent);
        drop(guard);
        self.shared.launch(launches);

        ImageRequest::waiting(key, receiver, Arc::clone(&self.shared), task_id, waiter_id)
    }

    /// Orphan every task for `document`
    ///
    /// Queued tasks never start. Running tasks are cancelled and their
    /// results discarded. Waiters resolve with [`RenderError::Cancelled`].
    /// Returns how many tasks were orphaned.
    pub fn cancel_document(&self, document: &DocumentId) -> usize {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let keys: Vec<RenderKey> =
            state.tasks.keys().filter(|key| key.belongs_to(document)).cloned().collect();

        let mut orphaned = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(task) = state.tasks.remove(&key) {
                task.token.cancel();
                orphaned.push(task);
            }
        }
        state.queue.retain(|admission| !admission.key.belongs_to(document));
        state.failed.retain(|key| !key.belongs_to(document));
        drop(guard);

        let count = orphaned.len();
        for task in orphaned {
            task.resolve(Err(RenderError::Cancelled));
        }
        if count > 0 {
            debug!(%document, tasks = count, "orphaned in-flight renders");
        }
        count
    }

    /// Loading state of `key`
    pub fn loading_state(&self, key: &RenderKey) -> LoadingState {
        let state = self.shared.state.lock();
        if self.shared.store.contains(key) {
            LoadingState::Ready
        } else if state.tasks.contains_key(key) {
            LoadingState::Pending
        } else if state.failed.contains(key) {
            LoadingState::Failed
        } else {
            LoadingState::Idle
        }
    }

    /// Number of renders executing now
    pub fn active_renders(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Number of tasks waiting for a slot
    pub fn queued_renders(&self) -> usize {
        self.shared.state.lock().queued()
    }

    /// Number of keys with a task in flight
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    pub fn max_concurrent_renders(&self) -> usize {
        self.shared.max_concurrent
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats { active: state.active, queued: state.queued(), ..state.stats }
    }
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("stats", &self.stats())
            .finish()
    }
}
