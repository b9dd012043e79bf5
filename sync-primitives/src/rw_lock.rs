//! Batch-admitting read/write lock with writer priority.
//!
//! ```text
//!   reads  ─► [r r r] ──┐ admitted all at once when no write is
//!                       ├─► scheduler    pending or running
//!   writes ─► [w w]  ───┘ one at a time; each waits for the
//!                         reader CountLock to reach zero first
//! ```
//!
//! Every scheduling pass checks pending writes before pending reads, so a
//! continuous stream of readers cannot starve a writer.

use {
    crate::{
        count_lock::CountLock,
        error::{Result, SyncError},
    },
    log::{trace, warn},
    parking_lot::Mutex,
    std::{collections::VecDeque, future::Future, sync::Arc, time::Duration},
    tokio::sync::oneshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct LockState {
    reads: VecDeque<Waiter>,
    writes: VecDeque<Waiter>,
    writing: bool,
    next_id: u64,
}

struct Inner {
    state: Mutex<LockState>,
    readers: CountLock,
    max_read_queue: usize,
}

impl Inner {
    /// One scheduler tick. Must be called with `state` locked.
    fn schedule(&self, state: &mut LockState) {
        if state.writing {
            return;
        }
        while let Some(writer) = state.writes.pop_front() {
            if writer.grant.send(()).is_ok() {
                trace!("write {} admitted", writer.id);
                state.writing = true;
                return;
            }
        }
        let mut admitted = 0usize;
        while let Some(reader) = state.reads.pop_front() {
            self.readers.increase(1);
            if reader.grant.send(()).is_ok() {
                admitted = admitted.saturating_add(1);
            } else {
                self.release_read();
            }
        }
        if admitted > 0 {
            trace!("admitted a batch of {admitted} reads");
        }
    }

    fn release_read(&self) {
        if let Err(e) = self.readers.decrease(1) {
            warn!("read lock release out of balance: {e}");
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.writing = false;
        self.schedule(&mut state);
    }
}

/// Read/write lock over an external resource.
///
/// Cloning yields another handle to the same lock.
#[derive(Clone)]
pub struct RwLock {
    inner: Arc<Inner>,
}

impl RwLock {
    /// `max_read_queue` bounds the number of readers waiting for admission.
    pub fn new(max_read_queue: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LockState::default()),
                readers: CountLock::new(),
                max_read_queue,
            }),
        }
    }

    /// Wait for a read slot.
    ///
    /// Fails with [`SyncError::ReadQueueFull`] if `max_read_queue` readers are
    /// already waiting, or [`SyncError::ReadTimeout`] if not admitted within
    /// `timeout`.
    pub async fn acquire_read_lock(&self, timeout: Option<Duration>) -> Result<ReadGuard> {
        let mut ticket = {
            let mut state = self.inner.state.lock();
            if state.reads.len() >= self.inner.max_read_queue {
                return Err(SyncError::ReadQueueFull {
                    max: self.inner.max_read_queue,
                });
            }
            self.enqueue(&mut state, Access::Read)
        };

        let granted = match timeout {
            None => (&mut ticket.grant).await.is_ok(),
            Some(timeout) => {
                match tokio::time::timeout(timeout, &mut ticket.grant).await {
                    Ok(result) => result.is_ok(),
                    Err(_) => {
                        let state = self.inner.state.lock();
                        if state.reads.iter().any(|w| w.id == ticket.id) {
                            drop(state);
                            // Ticket drop dequeues the waiter.
                            return Err(SyncError::ReadTimeout(timeout));
                        }
                        // Admitted right at the deadline.
                        drop(state);
                        ticket.grant.try_recv().is_ok()
                    }
                }
            }
        };
        if !granted {
            return Err(SyncError::Aborted);
        }
        ticket.settled = true;
        Ok(ReadGuard {
            inner: self.inner.clone(),
        })
    }

    /// Wait for exclusive access. Resolves only once every admitted reader
    /// has released its guard.
    pub async fn acquire_write_lock(&self) -> Result<WriteGuard> {
        let mut ticket = {
            let mut state = self.inner.state.lock();
            self.enqueue(&mut state, Access::Write)
        };
        if (&mut ticket.grant).await.is_err() {
            return Err(SyncError::Aborted);
        }
        ticket.settled = true;
        let guard = WriteGuard {
            inner: self.inner.clone(),
        };
        self.inner.readers.wait().await;
        Ok(guard)
    }

    /// Run `f` while holding a read slot.
    pub async fn run_with_read_lock<F, Fut, T>(&self, f: F, timeout: Option<Duration>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire_read_lock(timeout).await?;
        Ok(f().await)
    }

    /// Run `f` with exclusive access.
    pub async fn run_with_write_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire_write_lock().await?;
        Ok(f().await)
    }

    pub fn pending_reads(&self) -> usize {
        self.inner.state.lock().reads.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.state.lock().writes.len()
    }

    /// Readers admitted and not yet released.
    pub fn active_reads(&self) -> u64 {
        self.inner.readers.count()
    }

    /// Whether a writer has been admitted (it may still be draining readers).
    pub fn is_write_locked(&self) -> bool {
        self.inner.state.lock().writing
    }

    fn enqueue(&self, state: &mut LockState, access: Access) -> Ticket {
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        let (grant, receiver) = oneshot::channel();
        let waiter = Waiter { id, grant };
        match access {
            Access::Read => state.reads.push_back(waiter),
            Access::Write => state.writes.push_back(waiter),
        }
        self.inner.schedule(state);
        Ticket {
            inner: self.inner.clone(),
            id,
            access,
            grant: receiver,
            settled: false,
        }
    }
}

impl std::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RwLock")
            .field("pending_reads", &state.reads.len())
            .field("pending_writes", &state.writes.len())
            .field("writing", &state.writing)
            .field("active_reads", &self.inner.readers.count())
            .finish()
    }
}

/// A queued request. If the requesting future is dropped before the grant
/// is turned into a guard, the request is withdrawn, or released if it was
/// already granted.
struct Ticket {
    inner: Arc<Inner>,
    id: u64,
    access: Access,
    grant: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.inner.state.lock();
        let queue = match self.access {
            Access::Read => &mut state.reads,
            Access::Write => &mut state.writes,
        };
        if let Some(pos) = queue.iter().position(|w| w.id == self.id) {
            queue.remove(pos);
            return;
        }
        if self.grant.try_recv().is_ok() {
            match self.access {
                Access::Read => self.inner.release_read(),
                Access::Write => {
                    state.writing = false;
                    self.inner.schedule(&mut state);
                }
            }
        }
    }
}

/// Held while a read is admitted.
#[must_use]
pub struct ReadGuard {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard")
            .field("active_reads", &self.inner.readers.count())
            .finish()
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.inner.release_read();
    }
}

/// Held while a write has exclusive access.
#[must_use]
pub struct WriteGuard {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").finish_non_exhaustive()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.inner.release_write();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        assert_matches::assert_matches,
        tokio::task::yield_now,
    };

    async fn settle() {
        for _ in 0..5 {
            yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_reads_share_the_lock() {
        let lock = RwLock::new(16);
        let a = lock.acquire_read_lock(None).await.unwrap();
        let b = lock.acquire_read_lock(None).await.unwrap();
        let c = lock.acquire_read_lock(None).await.unwrap();
        assert_eq!(lock.active_reads(), 3);
        assert_eq!(format!("{a:?}"), "ReadGuard { active_reads: 3 }");
        drop((a, b, c));
        assert_eq!(lock.active_reads(), 0);
    }

    #[tokio::test]
    async fn test_writer_waits_for_admitted_reads() {
        let lock = RwLock::new(16);
        let read = lock.acquire_read_lock(None).await.unwrap();

        let writer = tokio::spawn({
            let lock = lock.clone();
            async move { lock.run_with_write_lock(|| async { "wrote" }).await }
        });
        settle().await;
        assert!(lock.is_write_locked());
        assert!(!writer.is_finished());

        drop(read);
        assert_eq!(writer.await.unwrap().unwrap(), "wrote");
        assert!(!lock.is_write_locked());
    }

    #[tokio::test]
    async fn test_pending_writer_blocks_new_reads() {
        let lock = RwLock::new(16);
        let log = Arc::new(Mutex::new(Vec::new()));
        let first_read = lock.acquire_read_lock(None).await.unwrap();

        let writer = tokio::spawn({
            let (lock, log) = (lock.clone(), log.clone());
            async move {
                lock.run_with_write_lock(|| async { log.lock().push("write") })
                    .await
            }
        });
        settle().await;

        let late_read = tokio::spawn({
            let (lock, log) = (lock.clone(), log.clone());
            async move {
                lock.run_with_read_lock(|| async { log.lock().push("late read") }, None)
                    .await
            }
        });
        settle().await;
        assert_eq!(lock.pending_reads(), 1);
        assert!(log.lock().is_empty());

        drop(first_read);
        writer.await.unwrap().unwrap();
        late_read.await.unwrap().unwrap();
        assert_eq!(*log.lock(), vec!["write", "late read"]);
    }

    #[tokio::test]
    async fn test_queued_reads_admitted_as_batch() {
        let lock = RwLock::new(16);
        let write = lock.acquire_write_lock().await.unwrap();

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let lock = lock.clone();
                tokio::spawn(async move { lock.acquire_read_lock(None).await })
            })
            .collect();
        settle().await;
        assert_eq!(lock.pending_reads(), 3);

        drop(write);
        let mut guards = Vec::new();
        for reader in readers {
            guards.push(reader.await.unwrap().unwrap());
        }
        assert_eq!(lock.active_reads(), 3);
        assert_eq!(lock.pending_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_while_write_held() {
        let lock = RwLock::new(16);
        let _write = lock.acquire_write_lock().await.unwrap();
        let timeout = Duration::from_millis(50);
        assert_matches!(
            lock.acquire_read_lock(Some(timeout)).await,
            Err(SyncError::ReadTimeout(t)) if t == timeout
        );
        assert_eq!(lock.pending_reads(), 0);
        assert_eq!(lock.active_reads(), 0);
    }

    #[tokio::test]
    async fn test_read_queue_full() {
        let lock = RwLock::new(1);
        let _write = lock.acquire_write_lock().await.unwrap();
        let _queued = tokio::spawn({
            let lock = lock.clone();
            async move { lock.acquire_read_lock(None).await.map(drop) }
        });
        settle().await;
        assert_matches!(
            lock.acquire_read_lock(None).await,
            Err(SyncError::ReadQueueFull { max: 1 })
        );
    }

    #[tokio::test]
    async fn test_cancelled_read_is_withdrawn() {
        let lock = RwLock::new(16);
        let write = lock.acquire_write_lock().await.unwrap();
        let pending = tokio::spawn({
            let lock = lock.clone();
            async move { lock.acquire_read_lock(None).await.map(drop) }
        });
        settle().await;
        assert_eq!(lock.pending_reads(), 1);
        pending.abort();
        settle().await;
        assert_eq!(lock.pending_reads(), 0);

        drop(write);
        assert_eq!(lock.active_reads(), 0);
        let _read = lock.acquire_read_lock(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_run_one_at_a_time() {
        let lock = RwLock::new(16);
        let first = lock.acquire_write_lock().await.unwrap();
        let second = tokio::spawn({
            let lock = lock.clone();
            async move { lock.acquire_write_lock().await.map(drop) }
        });
        settle().await;
        assert_eq!(lock.pending_writes(), 1);
        assert!(!second.is_finished());
        drop(first);
        second.await.unwrap().unwrap();
        assert!(!lock.is_write_locked());
    }
}
