//! In-flight render tasks
//!
//! A task is the single unit of render work for one [`RenderKey`]. Every
//! caller asking for that key while the task is in flight becomes one of its
//! waiters and receives the same outcome.

use std::collections::HashMap;

use folio_cache::{CacheEntry, RenderKey};
use folio_render::RenderError;
use tokio::sync::oneshot;

use crate::cancel::CancellationToken;
use crate::priority::Priority;

/// Unique identifier for a render task
pub type TaskId = u64;

/// Identifies one waiter on a task
pub(crate) type WaiterId = u64;

/// What a waiter receives when its task finishes
pub type RenderOutcome = Result<CacheEntry, RenderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Waiting for a render slot
    Queued,
    /// Executing on the blocking pool
    Running,
}

pub(crate) struct RenderTask {
    pub id: TaskId,
    pub key: RenderKey,
    pub priority: Priority,
    pub state: TaskState,
    pub token: CancellationToken,
    /// A waiter attached after the token was cancelled during this run
    pub reattached: bool,
    waiters: HashMap<WaiterId, oneshot::Sender<RenderOutcome>>,
}

impl RenderTask {
    pub fn new(id: TaskId, key: RenderKey, priority: Priority) -> Self {
        Self {
            id,
            key,
            priority,
            state: TaskState::Queued,
            token: CancellationToken::new(),
            reattached: false,
            waiters: HashMap::new(),
        }
    }

    /// Add a waiter and return the receiving end of its completion channel
    pub fn attach(&mut self, waiter: WaiterId) -> oneshot::Receiver<RenderOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(waiter, tx);
        rx
    }

    /// Remove a waiter. Returns `true` if it was attached.
    pub fn detach(&mut self, waiter: WaiterId) -> bool {
        self.waiters.remove(&waiter).is_some()
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Deliver `outcome` to every waiter. Returns how many were still
    /// listening.
    pub fn resolve(self, outcome: RenderOutcome) -> usize {
        let mut delivered = 0;
        for (_, waiter) in self.waiters {
            if waiter.send(outcome.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_render::{QualityMode, RenderedImage, RgbaImage};

    fn task() -> RenderTask {
        RenderTask::new(1, RenderKey::new("doc", 0, QualityMode::Preview), Priority::Interactive)
    }

    #[test]
    fn test_new_task_is_queued() {
        let task = task();
        assert_eq!(task.state, TaskState::Queued);
        assert!(!task.has_waiters());
        assert!(!task.token.is_cancelled());
        assert!(!task.reattached);
    }

    #[test]
    fn test_attach_detach() {
        let mut task = task();
        let _a = task.attach(1);
        let _b = task.attach(2);
        assert_eq!(task.waiter_count(), 2);

        assert!(task.detach(1));
        assert!(!task.detach(1));
        assert_eq!(task.waiter_count(), 1);
    }

    #[test]
    fn test_resolve_delivers_same_image_to_all() {
        let mut task = task();
        let mut a = task.attach(1);
        let mut b = task.attach(2);
        let dropped = task.attach(3);
        drop(dropped);

        let entry = CacheEntry::new(RenderedImage::new(RgbaImage::new(2, 2)));
        assert_eq!(task.resolve(Ok(entry)), 2);

        let first = a.try_recv().unwrap().unwrap();
        let second = b.try_recv().unwrap().unwrap();
        assert!(first.same_image(&second));
    }
}
