//! Idle/busy pool of protocol handlers with FIFO waiters.

use {
    crate::error::{Result, SyncError},
    log::{debug, trace},
    parking_lot::Mutex,
    rand::Rng,
    std::{
        collections::{HashSet, VecDeque},
        hash::Hash,
        sync::Arc,
        time::Duration,
    },
    tokio::sync::oneshot,
};

struct Waiter<T> {
    id: u64,
    handoff: oneshot::Sender<T>,
}

struct PoolState<T> {
    idle: Vec<T>,
    busy: HashSet<T>,
    waiters: VecDeque<Waiter<T>>,
    next_waiter: u64,
}

/// Hands out handlers to callers, waiting up to a deadline when all of them
/// are busy.
///
/// A handler is always in exactly one of the idle or busy sets. When a
/// handler is put back while callers are waiting, it goes straight to the
/// oldest waiter and stays busy.
pub struct HandlerPool<T> {
    state: Arc<Mutex<PoolState<T>>>,
}

impl<T> Clone for HandlerPool<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Eq + Hash + Clone + Send + 'static> Default for HandlerPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone + Send + 'static> HandlerPool<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                idle: Vec::new(),
                busy: HashSet::new(),
                waiters: VecDeque::new(),
                next_waiter: 0,
            })),
        }
    }

    /// Add a handler as idle, or hand it to the oldest waiter.
    pub fn add(&self, handler: T) {
        let mut state = self.state.lock();
        if state.busy.contains(&handler) || state.idle.contains(&handler) {
            debug!("handler already pooled");
            return;
        }
        Self::release(&mut state, handler);
    }

    /// Take a random idle handler, or wait up to `timeout` for one to be put
    /// back.
    pub async fn get(&self, timeout: Duration) -> Result<T> {
        let mut ticket = {
            let mut state = self.state.lock();
            if !state.idle.is_empty() {
                let index = rand::rng().random_range(0..state.idle.len());
                let handler = state.idle.swap_remove(index);
                state.busy.insert(handler.clone());
                return Ok(handler);
            }
            let id = state.next_waiter;
            state.next_waiter = state.next_waiter.wrapping_add(1);
            let (handoff, receiver) = oneshot::channel();
            state.waiters.push_back(Waiter { id, handoff });
            trace!("waiting for handler ({} waiters)", state.waiters.len());
            WaitTicket {
                id,
                receiver,
                pool: self.clone(),
            }
        };

        match tokio::time::timeout(timeout, &mut ticket.receiver).await {
            Ok(Ok(handler)) => Ok(handler),
            // The pool never drops a waiter's sender without sending.
            Ok(Err(_)) => Err(SyncError::GetHandlerTimeout(timeout)),
            Err(_) => {
                // A handoff may have landed right at the deadline.
                match ticket.receiver.try_recv() {
                    Ok(handler) => Ok(handler),
                    Err(_) => Err(SyncError::GetHandlerTimeout(timeout)),
                }
            }
        }
    }

    /// Return a busy handler. Returns false if the handler is not busy.
    pub fn put(&self, handler: T) -> bool {
        let mut state = self.state.lock();
        if !state.busy.remove(&handler) {
            debug!("put of a handler that is not busy");
            return false;
        }
        Self::release(&mut state, handler);
        true
    }

    /// Evict a handler from whichever set holds it.
    pub fn remove(&self, handler: &T) -> bool {
        let mut state = self.state.lock();
        if state.busy.remove(handler) {
            return true;
        }
        match state.idle.iter().position(|h| h == handler) {
            Some(index) => {
                state.idle.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.state.lock().busy.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn release(state: &mut PoolState<T>, mut handler: T) {
        while let Some(waiter) = state.waiters.pop_front() {
            state.busy.insert(handler.clone());
            match waiter.handoff.send(handler) {
                Ok(()) => return,
                Err(returned) => {
                    state.busy.remove(&returned);
                    handler = returned;
                }
            }
        }
        state.idle.push(handler);
    }
}

struct WaitTicket<T: Eq + Hash + Clone + Send + 'static> {
    id: u64,
    receiver: oneshot::Receiver<T>,
    pool: HandlerPool<T>,
}

impl<T: Eq + Hash + Clone + Send + 'static> Drop for WaitTicket<T> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        if let Some(index) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(index);
            return;
        }
        // Already handed a handler that nobody will receive.
        self.receiver.close();
        if let Ok(handler) = self.receiver.try_recv() {
            if state.busy.remove(&handler) {
                HandlerPool::release(&mut state, handler);
            }
        }
    }
}
