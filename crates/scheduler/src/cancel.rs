//! Cancellation tokens for renders and batches
//!
//! Cancellation is cooperative: a token is checked at task boundaries (before
//! a render starts, between batch chunks) and never interrupts work midway.
//! Async code can also wait for a token with [`CancellationToken::cancelled`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token for cooperative cancellation
///
/// Clones share the same underlying state.
///
/// # Example
///
/// ```
/// use folio_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// // In the render closure:
/// // if worker_token.is_cancelled() {
/// //     return Err(RenderError::Cancelled);
/// // }
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel this token and wake everything waiting on it
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Returns `true` if `cancel()` has been called on this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Reset this token to the non-cancelled state
    ///
    /// Used when a new waiter attaches to a render whose previous waiters all
    /// left. All clones observe the reset.
    pub fn reset(&self) {
        self.state.cancelled.store(false, Ordering::Release);
    }

    /// `true` if both tokens share the same state
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// Cancellation tokens indexed by id
///
/// The batch layer uses this to cancel sessions by id.
pub struct CancellationRegistry<K> {
    tokens: Mutex<HashMap<K, CancellationToken>>,
}

impl<K: Eq + Hash + Clone> CancellationRegistry<K> {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    /// Register `id` and return its token
    ///
    /// Registering an id that is already present cancels the old token and
    /// replaces it.
    pub fn register(&self, id: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.lock().insert(id, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel every id matching `predicate`. Returns how many were cancelled.
    pub fn cancel_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let tokens = self.tokens.lock();
        let mut cancelled = 0;
        for (id, token) in tokens.iter() {
            if predicate(id) {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Remove `id` only if it still maps to `token`. Returns `true` if removed.
    pub fn release(&self, id: &K, token: &CancellationToken) -> bool {
        let mut tokens = self.tokens.lock();
        let owned = tokens.get(id).is_some_and(|current| current.same_as(token));
        if owned {
            tokens.remove(id);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
