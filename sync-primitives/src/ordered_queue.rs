//! Parallel processing with in-order delivery.
//!
//! Sync fetches data for many heights at once but must commit it in height
//! order. Tasks are tagged with an increasing index on insert, processed up
//! to `limit` at a time, and their results are emitted strictly by index:
//!
//! ```text
//!  insert ─► input heap ─► [limit workers] ─► output heap ─► events (index order)
//!                 ▲               │
//!                 └── on error ───┘ (Error event, task retried)
//! ```

use {
    crate::error::{Result, SyncError},
    async_trait::async_trait,
    futures::FutureExt,
    log::{debug, error, warn},
    parking_lot::Mutex,
    std::{
        cmp::{Ordering, Reverse},
        collections::{BTreeMap, BinaryHeap, HashMap},
        panic::AssertUnwindSafe,
        sync::Arc,
        time::Duration,
    },
    tokio::{
        sync::{
            mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
            Notify,
        },
        task::{Id, JoinSet},
    },
};

/// Does the work for one queued task.
#[async_trait]
pub trait QueueProcessor: Send + Sync + 'static {
    type Task: Clone + Send + Sync + 'static;
    type Output: Send + 'static;
    type Error: std::fmt::Display + Send + 'static;

    async fn process(&self, task: &Self::Task) -> std::result::Result<Self::Output, Self::Error>;
}

/// Emitted on the channel returned by [`OrderedQueue::new`].
pub enum QueueEvent<P: QueueProcessor> {
    /// The task at `index` succeeded and every lower index was emitted before.
    Result {
        index: u64,
        task: P::Task,
        output: P::Output,
    },
    /// The task at `index` failed and has been requeued.
    Error {
        index: u64,
        task: P::Task,
        error: P::Error,
    },
}

impl<P: QueueProcessor> std::fmt::Debug for QueueEvent<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueEvent::Result { index, .. } => write!(f, "Result({index})"),
            QueueEvent::Error { index, error, .. } => write!(f, "Error({index}: {error})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderedQueueConfig {
    /// Maximum tasks processed concurrently.
    /// Default: 16.
    pub limit: usize,

    /// Delay before a failed task is processed again.
    /// Default: 100 ms.
    pub retry_backoff: Duration,
}

impl Default for OrderedQueueConfig {
    fn default() -> Self {
        Self {
            limit: 16,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl OrderedQueueConfig {
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            limit: 4,
            retry_backoff: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(SyncError::InvalidLimit(self.limit));
        }
        Ok(())
    }
}

/// Heap entry ordered by index only.
struct Indexed<T> {
    index: u64,
    attempt: u32,
    value: T,
}

impl<T> PartialEq for Indexed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Indexed<T> {}

impl<T> PartialOrd for Indexed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Indexed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

struct QueueState<P: QueueProcessor> {
    input: BinaryHeap<Reverse<Indexed<P::Task>>>,
    output: BinaryHeap<Reverse<Indexed<(P::Task, P::Output)>>>,
    next_insert: u64,
    next_emit: u64,
    /// Entries handed to a worker, by index.
    running: BTreeMap<u64, Indexed<P::Task>>,
    total: u64,
    processed: u64,
    aborted: bool,
}

impl<P: QueueProcessor> QueueState<P> {
    fn new() -> Self {
        Self {
            input: BinaryHeap::new(),
            output: BinaryHeap::new(),
            next_insert: 0,
            next_emit: 0,
            running: BTreeMap::new(),
            total: 0,
            processed: 0,
            aborted: false,
        }
    }

    fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
        self.next_insert = 0;
        self.next_emit = 0;
        self.total = 0;
        self.processed = 0;
    }
}

type Processed<P> = (
    u64,
    u32,
    <P as QueueProcessor>::Task,
    std::thread::Result<
        std::result::Result<<P as QueueProcessor>::Output, <P as QueueProcessor>::Error>,
    >,
);

/// Order-preserving bounded-concurrency queue.
///
/// Share it behind an `Arc` to insert or abort while [`start`](Self::start)
/// is running.
pub struct OrderedQueue<P: QueueProcessor> {
    processor: Arc<P>,
    config: OrderedQueueConfig,
    state: Mutex<QueueState<P>>,
    events: UnboundedSender<QueueEvent<P>>,
    wake: Notify,
    settled: Notify,
}

impl<P: QueueProcessor> OrderedQueue<P> {
    pub fn new(
        config: OrderedQueueConfig,
        processor: P,
    ) -> Result<(Self, UnboundedReceiver<QueueEvent<P>>)> {
        config.validate()?;
        let (events, receiver) = unbounded_channel();
        Ok((
            Self {
                processor: Arc::new(processor),
                config,
                state: Mutex::new(QueueState::new()),
                events,
                wake: Notify::new(),
                settled: Notify::new(),
            },
            receiver,
        ))
    }

    /// Queue `task` and return its index. Ignored while aborted.
    pub fn insert(&self, task: P::Task) -> Option<u64> {
        let mut state = self.state.lock();
        if state.aborted {
            debug!("ordered queue aborted; dropping insert");
            return None;
        }
        let index = state.next_insert;
        state.next_insert = state.next_insert.saturating_add(1);
        state.total = state.total.saturating_add(1);
        state.input.push(Reverse(Indexed {
            index,
            attempt: 0,
            value: task,
        }));
        drop(state);
        self.wake.notify_one();
        Some(index)
    }

    /// Process until every inserted task has been emitted.
    ///
    /// Tasks inserted while running are picked up. Returns
    /// [`SyncError::Aborted`] if [`abort`](Self::abort) is called first.
    ///
    /// Dropping the returned future cancels its workers and puts their tasks
    /// back in the queue, so a later `start` resumes them.
    pub async fn start(&self) -> Result<()> {
        let _release = ReleaseRunning { queue: self };
        let mut workers: JoinSet<Processed<P>> = JoinSet::new();
        let mut worker_index: HashMap<Id, u64> = HashMap::new();
        loop {
            {
                let mut state = self.state.lock();
                if state.aborted {
                    if workers.is_empty() {
                        return Err(SyncError::Aborted);
                    }
                } else {
                    while state.running.len() < self.config.limit {
                        let Some(Reverse(entry)) = state.input.pop() else {
                            break;
                        };
                        let index = entry.index;
                        state.running.insert(
                            index,
                            Indexed {
                                index,
                                attempt: entry.attempt,
                                value: entry.value.clone(),
                            },
                        );
                        let worker = workers.spawn(Self::process(
                            self.processor.clone(),
                            self.config.retry_backoff,
                            entry,
                        ));
                        worker_index.insert(worker.id(), index);
                    }
                    if workers.is_empty() && state.processed == state.total {
                        return Ok(());
                    }
                }
            }

            tokio::select! {
                Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                    match joined {
                        Ok((id, processed)) => {
                            worker_index.remove(&id);
                            self.complete(processed);
                        }
                        Err(e) => {
                            // Panics are caught in the worker; this is a cancellation.
                            error!("ordered queue worker failed: {e}");
                            if let Some(index) = worker_index.remove(&e.id()) {
                                let mut state = self.state.lock();
                                if let Some(entry) = state.running.remove(&index) {
                                    if !state.aborted {
                                        state.input.push(Reverse(entry));
                                    }
                                }
                                self.notify_if_settled(&state);
                            }
                        }
                    }
                }
                () = self.wake.notified() => {}
            }
        }
    }

    fn process(
        processor: Arc<P>,
        backoff: Duration,
        entry: Indexed<P::Task>,
    ) -> impl std::future::Future<Output = Processed<P>> {
        async move {
            let Indexed {
                index,
                attempt,
                value: task,
            } = entry;
            if attempt > 0 && !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            let result = AssertUnwindSafe(processor.process(&task))
                .catch_unwind()
                .await;
            (index, attempt, task, result)
        }
    }

    fn complete(&self, (index, attempt, task, result): Processed<P>) {
        let mut state = self.state.lock();
        state.running.remove(&index);
        self.notify_if_settled(&state);
        if state.aborted {
            return;
        }
        match result {
            Ok(Ok(output)) => {
                state.output.push(Reverse(Indexed {
                    index,
                    attempt,
                    value: (task, output),
                }));
                while state
                    .output
                    .peek()
                    .is_some_and(|Reverse(head)| head.index == state.next_emit)
                {
                    let Some(Reverse(head)) = state.output.pop() else {
                        break;
                    };
                    let (task, output) = head.value;
                    state.next_emit = state.next_emit.saturating_add(1);
                    state.processed = state.processed.saturating_add(1);
                    let _ = self.events.send(QueueEvent::Result {
                        index: head.index,
                        task,
                        output,
                    });
                }
            }
            Ok(Err(error)) => {
                warn!("ordered queue task {index} failed (attempt {attempt}): {error}");
                state.input.push(Reverse(Indexed {
                    index,
                    attempt: attempt.saturating_add(1),
                    value: task.clone(),
                }));
                let _ = self.events.send(QueueEvent::Error { index, task, error });
            }
            Err(_) => {
                error!("ordered queue task {index} panicked; retrying");
                state.input.push(Reverse(Indexed {
                    index,
                    attempt: attempt.saturating_add(1),
                    value: task,
                }));
            }
        }
    }

    fn notify_if_settled(&self, state: &QueueState<P>) {
        if state.running.is_empty() {
            self.settled.notify_waiters();
        }
    }

    /// Stop admitting tasks, wait for in-flight ones to settle, then clear
    /// all queued work. The queue stays aborted until [`reset`](Self::reset).
    pub async fn abort(&self) {
        {
            let mut state = self.state.lock();
            state.aborted = true;
        }
        self.wake.notify_one();
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().running.is_empty() {
                break;
            }
            notified.await;
        }
        self.state.lock().clear();
        debug!("ordered queue aborted");
    }

    /// Abort, then make the queue runnable again from index 0.
    pub async fn reset(&self) {
        self.abort().await;
        self.state.lock().aborted = false;
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Results emitted so far.
    pub fn processed(&self) -> u64 {
        self.state.lock().processed
    }

    /// Tasks inserted since the last reset.
    pub fn total(&self) -> u64 {
        self.state.lock().total
    }

    /// Tasks currently held by a worker.
    pub fn in_flight(&self) -> usize {
        self.state.lock().running.len()
    }
}

/// Returns the entries of a cancelled `start` to the input heap, or drops
/// them if the queue was aborted, and wakes `abort` waiters.
struct ReleaseRunning<'a, P: QueueProcessor> {
    queue: &'a OrderedQueue<P>,
}

impl<P: QueueProcessor> Drop for ReleaseRunning<'_, P> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        if state.running.is_empty() {
            return;
        }
        let running = std::mem::take(&mut state.running);
        debug!("ordered queue start dropped with {} tasks in flight", running.len());
        if !state.aborted {
            state.input.extend(running.into_values().map(Reverse));
        }
        drop(state);
        self.queue.settled.notify_waiters();
        self.queue.wake.notify_one();
    }
}
