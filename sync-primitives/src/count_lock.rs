//! A barrier that opens whenever a counter drops back to zero.

use {
    crate::error::{Result, SyncError},
    parking_lot::Mutex,
    tokio::sync::Notify,
};

#[derive(Debug, Default)]
struct CountState {
    count: u64,
    /// Bumped on every transition to zero.
    epoch: u64,
}

/// Counter-keyed barrier.
///
/// `wait()` resolves immediately at zero, otherwise the next time the counter
/// returns to zero, even if it has been raised again by the time the waiter
/// runs.
#[derive(Debug, Default)]
pub struct CountLock {
    state: Mutex<CountState>,
    zero: Notify,
}

impl CountLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn increase(&self, n: u64) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_add(n);
    }

    /// Fails with [`SyncError::InvalidDecrease`] if `n` exceeds the count.
    pub fn decrease(&self, n: u64) -> Result<()> {
        let mut state = self.state.lock();
        let Some(count) = state.count.checked_sub(n) else {
            return Err(SyncError::InvalidDecrease {
                count: state.count,
                by: n,
            });
        };
        state.count = count;
        if count == 0 && n > 0 {
            state.epoch = state.epoch.wrapping_add(1);
            drop(state);
            self.zero.notify_waiters();
        }
        Ok(())
    }

    pub async fn wait(&self) {
        let epoch = {
            let state = self.state.lock();
            if state.count == 0 {
                return;
            }
            state.epoch
        };
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if state.count == 0 || state.epoch != epoch {
                    return;
                }
            }
            notified.await;
        }
    }
}
