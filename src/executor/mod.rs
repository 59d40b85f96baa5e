//! Bounded-concurrency task executor.
//!
//! [`BoundedExecutor`] caps how many operations run at once, whatever they
//! are. Slots are permits of a fair (FIFO) Tokio [`Semaphore`]; waiting for a
//! slot suspends the caller without blocking a worker thread.
//!
//! ## Operations
//!
//! - [`run`](BoundedExecutor::run) — one task, queued while every slot is taken.
//! - [`run_batch`](BoundedExecutor::run_batch) — a sliding window over a task
//!   list: as soon as one task finishes, the next one starts.
//! - [`rate_limited_run`](BoundedExecutor::rate_limited_run) — a fixed delay,
//!   then [`run`](BoundedExecutor::run). A plain throttle, not a token bucket.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Failures raised by the executor itself rather than by a task.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("executor is closed")]
    Closed,

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl From<ExecutorError> for FetchError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Closed => FetchError::Cancelled,
            ExecutorError::Panicked(message) => FetchError::TaskFailed(message),
        }
    }
}

/// Caps the number of simultaneously active operations.
///
/// Cloning is cheap and clones share the same slots.
///
/// # Examples
///
/// ```
/// use rfetch::executor::{BoundedExecutor, ExecutorError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let executor = BoundedExecutor::new(2);
/// let tasks = (0..5).map(|i| (i, async move { Ok::<_, ExecutorError>(i * 10) }));
///
/// let results = executor.run_batch(tasks, 2).await;
/// assert_eq!(results.len(), 5);
/// assert_eq!(results[&3].as_ref().ok(), Some(&30));
/// # }
/// ```
#[derive(Clone)]
pub struct BoundedExecutor {
    slots: Arc<Semaphore>,
    limit: usize,
    rate_limit_delay: Duration,
}

impl BoundedExecutor {
    /// Creates an executor with `limit` slots. A zero limit is raised to one.
    pub fn new(limit: usize) -> Self {
        let limit = if limit == 0 {
            warn!("executor limit of 0 would never run anything, using 1");
            1
        } else {
            limit
        };
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            rate_limit_delay: Duration::ZERO,
        }
    }

    /// Sets the delay [`rate_limited_run`](Self::rate_limited_run) waits before dispatch.
    #[must_use]
    pub fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    /// Closes the executor: queued and future [`run`](Self::run) calls fail
    /// with [`ExecutorError::Closed`]. Tasks already running finish normally.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Runs `task` once a slot is free, releasing the slot when it finishes.
    ///
    /// The slot is released whether the task succeeds, fails, panics, or the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// The task's own error, or [`ExecutorError::Closed`] (converted into
    /// `E`) if the executor was closed while waiting.
    pub async fn run<F, T, E>(&self, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ExecutorError>,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| E::from(ExecutorError::Closed))?;
        task.await
    }

    /// Waits the configured rate-limit delay, then calls [`run`](Self::run).
    pub async fn rate_limited_run<F, T, E>(&self, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ExecutorError>,
    {
        if !self.rate_limit_delay.is_zero() {
            tokio::time::sleep(self.rate_limit_delay).await;
        }
        self.run(task).await
    }

    /// Runs every task with at most `limit` of them active at once.
    ///
    /// The window slides: each completion immediately starts the next queued
    /// task. Every task also takes one of the executor's own slots, so the
    /// effective width is `min(limit, self.limit())`.
    ///
    /// A task failing (or panicking) never affects its siblings; its error
    /// is recorded under its id in the returned map.
    pub async fn run_batch<I, K, F, T, E>(&self, tasks: I, limit: usize) -> HashMap<K, Result<T, E>>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Eq + Hash,
        F: Future<Output = Result<T, E>>,
        E: From<ExecutorError>,
    {
        let limit = limit.max(1);
        let mut queued = tasks.into_iter();
        let mut running = FuturesUnordered::new();
        for (id, task) in queued.by_ref().take(limit) {
            running.push(self.guarded(id, task));
        }
        debug!(limit, started = running.len(), "batch started");

        let mut results = HashMap::new();
        while let Some((id, outcome)) = running.next().await {
            results.insert(id, outcome);
            if let Some((id, task)) = queued.next() {
                running.push(self.guarded(id, task));
            }
        }
        debug!(completed = results.len(), "batch finished");
        results
    }

    /// Like [`run_batch`](Self::run_batch) but keeps only successes.
    ///
    /// Failed tasks are logged at `warn` and omitted from the map.
    pub async fn run_batch_ok<I, K, F, T, E>(&self, tasks: I, limit: usize) -> HashMap<K, T>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Eq + Hash + fmt::Debug,
        F: Future<Output = Result<T, E>>,
        E: From<ExecutorError> + fmt::Display,
    {
        self.run_batch(tasks, limit)
            .await
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Ok(value) => Some((id, value)),
                Err(e) => {
                    warn!(id = ?id, error = %e, "batch task failed, omitted");
                    None
                }
            })
            .collect()
    }

    async fn guarded<K, F, T, E>(&self, id: K, task: F) -> (K, Result<T, E>)
    where
        F: Future<Output = Result<T, E>>,
        E: From<ExecutorError>,
    {
        let outcome = AssertUnwindSafe(self.run(task))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(E::from(ExecutorError::Panicked(panic_message(&*payload)))));
        (id, outcome)
    }
}

impl fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("limit", &self.limit)
            .field("active", &self.active())
            .field("rate_limit_delay", &self.rate_limit_delay)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
