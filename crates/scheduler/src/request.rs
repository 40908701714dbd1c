//! Caller-side handle for one image request

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use folio_cache::RenderKey;
use folio_render::RenderError;
use tokio::sync::oneshot;

use crate::scheduler::Shared;
use crate::task::{RenderOutcome, TaskId, WaiterId};

/// Pending or completed request for a page image
///
/// Resolves to the cached entry or the render error. Dropping the request
/// (or calling [`ImageRequest::cancel`]) before it resolves withdraws this
/// caller's interest; the render itself is abandoned once no caller is left.
#[must_use = "dropping an ImageRequest withdraws interest in the render"]
pub struct ImageRequest {
    key: RenderKey,
    state: RequestState,
}

enum RequestState {
    Ready(Option<RenderOutcome>),
    Waiting {
        receiver: oneshot::Receiver<RenderOutcome>,
        ticket: Option<WaiterTicket>,
    },
}

struct WaiterTicket {
    shared: Arc<Shared>,
    task_id: TaskId,
    waiter_id: WaiterId,
}

impl ImageRequest {
    /// A request that is already resolved
    pub fn ready(key: RenderKey, outcome: RenderOutcome) -> Self {
        Self { key, state: RequestState::Ready(Some(outcome)) }
    }

    /// A request that fails without touching the scheduler
    pub fn failed(key: RenderKey, error: RenderError) -> Self {
        Self::ready(key, Err(error))
    }

    pub(crate) fn waiting(
        key: RenderKey,
        receiver: oneshot::Receiver<RenderOutcome>,
        shared: Arc<Shared>,
        task_id: TaskId,
        waiter_id: WaiterId,
    ) -> Self {
        Self {
            key,
            state: RequestState::Waiting {
                receiver,
                ticket: Some(WaiterTicket { shared, task_id, waiter_id }),
            },
        }
    }

    pub fn key(&self) -> &RenderKey {
        &self.key
    }

    /// `true` if the request resolved synchronously (cache hit or
    /// validation failure)
    pub fn is_immediate(&self) -> bool {
        matches!(self.state, RequestState::Ready(_))
    }

    /// Withdraw interest in the render
    pub fn cancel(self) {
        drop(self);
    }
}

impl Future for ImageRequest {
    type Output = RenderOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            RequestState::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(RenderError::Cancelled)))
            }
            RequestState::Waiting { receiver, ticket } => match Pin::new(receiver).poll(cx) {
                Poll::Ready(outcome) => {
                    // Resolved, or the task was orphaned and its sender dropped
                    ticket.take();
                    Poll::Ready(outcome.unwrap_or(Err(RenderError::Cancelled)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Drop for ImageRequest {
    fn drop(&mut self) {
        if let RequestState::Waiting { ticket: Some(ticket), .. } = &self.state {
            ticket.shared.detach(&self.key, ticket.task_id, ticket.waiter_id);
        }
    }
}

impl std::fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRequest")
            .field("key", &self.key)
            .field("immediate", &self.is_immediate())
            .finish()
    }
}
