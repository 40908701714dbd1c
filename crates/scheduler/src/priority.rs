//! Render priorities and the admission queue
//!
//! Priority decides which queued render is admitted next when a slot frees
//! up. It never preempts a render that is already running.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use folio_cache::RenderKey;

use crate::task::TaskId;

/// Render priority
///
/// Higher values are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Prefetch and speculative renders, batch work
    #[default]
    Background = 0,

    /// Pages currently visible
    Interactive = 1,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Background => f.write_str("background"),
            Priority::Interactive => f.write_str("interactive"),
        }
    }
}

/// A queued admission ticket
///
/// Ordered by priority, then by insertion order so renders of equal
/// priority are admitted first-in first-out.
#[derive(Debug, Clone)]
pub(crate) struct Admission {
    pub key: RenderKey,
    pub task_id: TaskId,
    pub priority: Priority,
    insertion_order: u64,
}

impl PartialEq for Admission {
    fn eq(&self, other: &Self) -> bool {
        self.insertion_order == other.insertion_order
    }
}

impl Eq for Admission {}

impl PartialOrd for Admission {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Admission {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Priority queue of renders waiting for a slot
///
/// Entries may go stale (the task was dropped, promoted or already started);
/// the scheduler validates each popped entry against its task table.
#[derive(Debug, Default)]
pub(crate) struct AdmissionQueue {
    heap: BinaryHeap<Admission>,
    insertion_counter: u64,
}

impl AdmissionQueue {
    pub fn push(&mut self, key: RenderKey, task_id: TaskId, priority: Priority) {
        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;
        self.heap.push(Admission { key, task_id, priority, insertion_order });
    }

    pub fn pop(&mut self) -> Option<Admission> {
        self.heap.pop()
    }

    /// Drop entries rejected by `keep`
    pub fn retain(&mut self, keep: impl FnMut(&Admission) -> bool) {
        self.heap.retain(keep);
    }
}
