//! Many cancellable timeouts driven by a single timer.

use {
    log::{error, trace},
    parking_lot::Mutex,
    std::{panic::AssertUnwindSafe, sync::Arc, time::Duration},
    tokio::{sync::Notify, task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
};

/// Identifies a scheduled timeout for [`TimeoutQueue::clear_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: Instant,
    id: TimeoutId,
    callback: Callback,
}

#[derive(Default)]
struct Entries {
    /// Sorted by `(deadline, id)`.
    pending: Vec<Entry>,
    next_id: u64,
}

struct Shared {
    entries: Mutex<Entries>,
    rearm: Notify,
}

/// A set of independent timeouts sharing one driver task.
///
/// The driver always sleeps until the soonest deadline. Entries whose
/// deadlines have passed when it wakes are fired together, in deadline
/// order, and it rearms for the next one. Dropping the queue stops the
/// driver without firing anything still pending.
pub struct TimeoutQueue {
    shared: Arc<Shared>,
    exit: CancellationToken,
    driver: JoinHandle<()>,
}

impl TimeoutQueue {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            entries: Mutex::new(Entries::default()),
            rearm: Notify::new(),
        });
        let exit = CancellationToken::new();
        let driver = tokio::spawn(run_driver(shared.clone(), exit.clone()));
        Self {
            shared,
            exit,
            driver,
        }
    }

    /// Run `callback` once `delay` has elapsed, unless cleared first.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimeoutId
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(far_future);
        let mut entries = self.shared.entries.lock();
        let id = TimeoutId(entries.next_id);
        entries.next_id = entries.next_id.wrapping_add(1);
        let position = entries
            .pending
            .partition_point(|entry| (entry.deadline, entry.id.0) <= (deadline, id.0));
        entries.pending.insert(
            position,
            Entry {
                deadline,
                id,
                callback: Box::new(callback),
            },
        );
        drop(entries);
        if position == 0 {
            self.shared.rearm.notify_one();
        }
        id
    }

    /// Cancel a pending timeout. Returns false if it already fired or was
    /// cleared.
    pub fn clear_timeout(&self, id: TimeoutId) -> bool {
        let mut entries = self.shared.entries.lock();
        let Some(position) = entries.pending.iter().position(|entry| entry.id == id) else {
            return false;
        };
        entries.pending.remove(position);
        drop(entries);
        if position == 0 {
            self.shared.rearm.notify_one();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TimeoutQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutQueue {
    fn drop(&mut self) {
        self.exit.cancel();
        self.driver.abort();
    }
}

/// Deadline used when `now + delay` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn far_future() -> Instant {
    let now = Instant::now();
    now.checked_add(FAR_FUTURE).unwrap_or(now)
}

async fn run_driver(shared: Arc<Shared>, exit: CancellationToken) {
    loop {
        let next = shared
            .entries
            .lock()
            .pending
            .first()
            .map(|entry| entry.deadline);
        let timer = async {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = exit.cancelled() => break,
            () = shared.rearm.notified() => continue,
            () = timer => {}
        }

        let now = Instant::now();
        let due: Vec<Entry> = {
            let mut entries = shared.entries.lock();
            let split = entries
                .pending
                .partition_point(|entry| entry.deadline <= now);
            entries.pending.drain(..split).collect()
        };
        if due.len() > 1 {
            trace!("firing {} timeouts together", due.len());
        }
        for entry in due {
            if std::panic::catch_unwind(AssertUnwindSafe(entry.callback)).is_err() {
                error!("timeout callback {:?} panicked", entry.id);
            }
        }
    }
}
