//! Folio Scheduler Library
//!
//! Asynchronous render scheduling for page images.
//!
//! Requests for the same [`RenderKey`](folio_cache::RenderKey) share one
//! in-flight render. Queued renders are admitted by [`Priority`] (FIFO within
//! a level) up to a concurrency limit and executed on Tokio's blocking pool.
//! Successful images are published to the
//! [`ImageStore`](folio_cache::ImageStore) before any waiter sees them, so a
//! request that observes completion can always re-read the image from the
//! store.
//!
//! Dropping an [`ImageRequest`] withdraws interest. A queued render with no
//! waiters left never starts; a running one is cancelled and its result
//! discarded.

mod cancel;
mod priority;
mod request;
mod scheduler;
mod task;
mod worker;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::Priority;
pub use request::ImageRequest;
pub use scheduler::{LoadingState, RenderScheduler, SchedulerError, SchedulerStats};
pub use task::{RenderOutcome, TaskId};
pub use worker::{RenderExecutor, SchedulerConfig, DEFAULT_MAX_CONCURRENT_RENDERS};
