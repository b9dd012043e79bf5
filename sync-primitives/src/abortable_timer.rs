//! A single sleep that can be cut short.

use {
    crate::error::{Result, SyncError},
    log::trace,
    parking_lot::Mutex,
    std::time::Duration,
    tokio::sync::oneshot,
};

/// How an [`AbortableTimer::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Aborted,
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    active: Option<(u64, oneshot::Sender<()>)>,
}

/// Sleeps for a duration unless [`abort`](Self::abort) is called first.
/// Only one wait may be outstanding at a time.
#[derive(Default)]
pub struct AbortableTimer {
    state: Mutex<TimerState>,
}

impl AbortableTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`SyncError::AlreadyWaiting`] if another wait is pending.
    pub async fn wait(&self, duration: Duration) -> Result<WaitOutcome> {
        let (generation, aborted) = {
            let mut state = self.state.lock();
            if state.active.is_some() {
                return Err(SyncError::AlreadyWaiting);
            }
            state.generation = state.generation.wrapping_add(1);
            let (sender, receiver) = oneshot::channel();
            state.active = Some((state.generation, sender));
            (state.generation, receiver)
        };
        let _guard = ActiveWait {
            timer: self,
            generation,
        };

        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(WaitOutcome::Elapsed),
            _ = aborted => {
                trace!("timer wait aborted");
                Ok(WaitOutcome::Aborted)
            }
        }
    }

    /// Resolve the pending wait with [`WaitOutcome::Aborted`]. Returns false
    /// if nothing was waiting.
    pub fn abort(&self) -> bool {
        match self.state.lock().active.take() {
            Some((_, sender)) => {
                let _ = sender.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.state.lock().active.is_some()
    }
}

/// Clears the active slot when a wait ends or is cancelled, unless an abort
/// already took it and a newer wait has started.
struct ActiveWait<'a> {
    timer: &'a AbortableTimer,
    generation: u64,
}

impl Drop for ActiveWait<'_> {
    fn drop(&mut self) {
        let mut state = self.timer.state.lock();
        if matches!(state.active, Some((generation, _)) if generation == self.generation) {
            state.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches, std::sync::Arc};

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses() {
        let timer = AbortableTimer::new();
        assert!(!timer.is_waiting());
        assert_eq!(
            timer.wait(Duration::from_millis(100)).await,
            Ok(WaitOutcome::Elapsed)
        );
        assert!(!timer.is_waiting());
        assert!(!timer.abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_resolves_wait() {
        let timer = Arc::new(AbortableTimer::new());
        let waiter = tokio::spawn({
            let timer = timer.clone();
            async move { timer.wait(Duration::from_secs(60)).await }
        });
        tokio::task::yield_now().await;
        assert!(timer.is_waiting());

        assert!(timer.abort());
        assert_eq!(waiter.await.unwrap(), Ok(WaitOutcome::Aborted));
        assert!(!timer.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_wait_fails() {
        let timer = Arc::new(AbortableTimer::new());
        let waiter = tokio::spawn({
            let timer = timer.clone();
            async move { timer.wait(Duration::from_millis(100)).await }
        });
        tokio::task::yield_now().await;

        assert_matches!(
            timer.wait(Duration::from_millis(10)).await,
            Err(SyncError::AlreadyWaiting)
        );
        assert_eq!(waiter.await.unwrap(), Ok(WaitOutcome::Elapsed));

        assert_eq!(
            timer.wait(Duration::from_millis(10)).await,
            Ok(WaitOutcome::Elapsed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_frees_timer() {
        let timer = AbortableTimer::new();
        let wait = timer.wait(Duration::from_secs(60));
        assert_matches!(
            tokio::time::timeout(Duration::from_millis(10), wait).await,
            Err(_)
        );
        assert!(!timer.is_waiting());
    }
}
