//! Shared, abortable background operations.
//!
//! A [`Flight`] is one spawned Tokio task whose outcome any number of
//! callers can await. Dropping a waiter never cancels the task; only
//! [`Flight::cancel`] does, and every waiter then observes
//! [`FetchError::Cancelled`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;
use tracing::warn;

use crate::error::{FetchError, FetchResult};

pub(crate) type SharedResult<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

pub(crate) struct Flight<T> {
    id: u64,
    result: SharedResult<T>,
    abort: AbortHandle,
    cancelled: Arc<AtomicBool>,
}

impl<T> Flight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns `work` on the current Tokio runtime.
    pub(crate) fn spawn<Fut>(id: u64, work: Fut) -> Self
    where
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        let abort = handle.abort_handle();
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        let result = async move {
            let outcome = handle.await;
            // A flight cancelled after its work finished still reports cancellation.
            if flag.load(Ordering::SeqCst) {
                return Err(FetchError::Cancelled);
            }
            match outcome {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(FetchError::Cancelled),
                Err(e) => {
                    warn!(id, error = %e, "background task failed");
                    Err(FetchError::TaskFailed(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        Self {
            id,
            result,
            abort,
            cancelled,
        }
    }
}

impl<T> Flight<T> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Returns a future resolving to the flight's outcome.
    pub(crate) fn join(&self) -> SharedResult<T> {
        self.result.clone()
    }

    /// Aborts the task. Current and future waiters get [`FetchError::Cancelled`].
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.abort.abort();
    }
}
