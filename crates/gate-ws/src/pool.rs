//! Bounded task pools and blocking socket work.
//!
//! Connection drains and executor calls each run on a [`WorkerPool`]: tasks
//! are tracked by the gateway's [`TaskTracker`] and at most `size` of them
//! run at once. Anything that may block on a socket goes through
//! [`run_blocking`] so it never holds up a runtime worker.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Span, dispatcher};

use crate::errors::Result;

/// Tracked tasks behind a concurrency limit.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl WorkerPool {
    /// A pool of `size` workers whose tasks count towards `tracker`.
    ///
    /// Must be called from within a Tokio runtime. Tasks may later be
    /// submitted from any thread, including the blocking pool.
    pub fn new(size: usize, tracker: TaskTracker) -> Self {
        Self {
            tracker,
            permits: Arc::new(Semaphore::new(size.max(1))),
            runtime: Handle::current(),
        }
    }

    /// Workers not currently running a task.
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queue `task`. It starts once a worker is free.
    pub fn submit<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let task = async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        };
        self.tracker.spawn_on(task.with_current_subscriber(), &self.runtime)
    }
}

/// Run `work` on the blocking pool, logging to the caller's subscriber and
/// inside the caller's span.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    let dispatch = dispatcher::get_default(Dispatch::clone);
    tokio::task::spawn_blocking(move || dispatcher::with_default(&dispatch, || span.in_scope(work))).await?
}
