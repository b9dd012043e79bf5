//! Runs at most `limit` tasks at once; the rest wait in submission order.

use {
    crate::error::{Result, SyncError},
    futures::{
        future::{BoxFuture, FutureExt},
        Future,
    },
    log::{debug, warn},
    parking_lot::Mutex,
    std::{collections::VecDeque, panic::AssertUnwindSafe, sync::Arc},
    tokio::sync::{oneshot, Notify},
};

#[derive(Default)]
struct RunnerState {
    running: usize,
    queue: VecDeque<BoxFuture<'static, ()>>,
}

struct Inner {
    limit: usize,
    state: Mutex<RunnerState>,
    idle: Notify,
}

/// Bounded-concurrency task runner.
///
/// Each admitted task occupies a worker; when it finishes, the worker picks
/// up the oldest queued task, so queued work starts strictly in submission
/// order.
#[derive(Clone)]
pub struct LimitedConcurrency {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LimitedConcurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LimitedConcurrency")
            .field("limit", &self.inner.limit)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Completion handle for one submitted task.
#[must_use = "dropping the handle does not cancel the task"]
pub struct ConcurrencyHandle<T> {
    result: oneshot::Receiver<Result<T>>,
}

impl<T> std::fmt::Debug for ConcurrencyHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyHandle").finish_non_exhaustive()
    }
}

impl<T> ConcurrencyHandle<T> {
    /// Wait for the task. A panicking task yields [`SyncError::TaskPanicked`].
    pub async fn join(self) -> Result<T> {
        self.result.await.unwrap_or(Err(SyncError::Aborted))
    }
}

impl LimitedConcurrency {
    /// Fails with [`SyncError::InvalidLimit`] when `limit` is zero.
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(SyncError::InvalidLimit(limit));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                limit,
                state: Mutex::new(RunnerState::default()),
                idle: Notify::new(),
            }),
        })
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Submit `task`. It starts now if a slot is free, otherwise once every
    /// earlier submission has started and a slot frees up.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new_concurrency<F, Fut, T>(&self, task: F) -> ConcurrencyHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, result) = oneshot::channel();
        let job = async move {
            let outcome = AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await
                .map_err(|_| {
                    warn!("limited concurrency task panicked");
                    SyncError::TaskPanicked
                });
            // The caller may have dropped the handle.
            let _ = sender.send(outcome);
        }
        .boxed();

        let mut state = self.inner.state.lock();
        if state.running < self.inner.limit {
            state.running = state.running.saturating_add(1);
            drop(state);
            tokio::spawn(run_worker(self.inner.clone(), job));
        } else {
            state.queue.push_back(job);
            debug!("task queued ({} waiting)", state.queue.len());
        }
        ConcurrencyHandle { result }
    }

    /// Resolve once nothing is running or queued.
    pub async fn finished(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock();
                if state.running == 0 && state.queue.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

async fn run_worker(inner: Arc<Inner>, mut job: BoxFuture<'static, ()>) {
    loop {
        job.await;
        let mut state = inner.state.lock();
        match state.queue.pop_front() {
            Some(next) => job = next,
            None => {
                state.running = state.running.saturating_sub(1);
                let idle = state.running == 0;
                drop(state);
                if idle {
                    inner.idle.notify_waiters();
                }
                return;
            }
        }
    }
}
