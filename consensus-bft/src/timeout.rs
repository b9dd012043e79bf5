//! Single-flight timeout ticker for the consensus state machine.
//!
//! The ticker remembers the most advanced `(height, round, step)` it has been
//! asked to schedule. A request for anything not strictly ahead of that is
//! dropped; a request that is ahead replaces the pending timer. When the
//! timer fires, the timeout is delivered on the channel returned by
//! [`TimeoutTicker::start`].
//!
//! ```text
//!   schedule(t) ──► tick channel ──► actor ──(sleep_until)──► tock channel ──► engine
//!                                     │
//!                                     └─ drops t unless t > max(height, round, step)
//! ```

use {
    log::{debug, trace},
    std::time::Duration,
    tokio::{
        sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        task::JoinHandle,
        time::{sleep_until, Instant},
    },
    trv1_consensus_messages::{RoundStep, StateMachineTimeout},
};

/// Upper bound on a single timer; keeps deadline arithmetic in range.
const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Handle to the ticker actor. Dropping it stops the actor.
#[derive(Debug)]
pub struct TimeoutTicker {
    tick_sender: UnboundedSender<StateMachineTimeout>,
    task: JoinHandle<()>,
}

impl TimeoutTicker {
    /// Spawn the ticker on the current tokio runtime.
    ///
    /// Returns the handle and the receiver on which fired timeouts arrive,
    /// in the order they fire.
    pub fn start() -> (Self, UnboundedReceiver<StateMachineTimeout>) {
        let (tick_sender, tick_receiver) = unbounded_channel();
        let (tock_sender, tock_receiver) = unbounded_channel();
        let task = tokio::spawn(run_ticker(tick_receiver, tock_sender));
        (Self { tick_sender, task }, tock_receiver)
    }

    /// Ask for `timeout` to fire after `timeout.duration`. Never blocks.
    pub fn schedule(&self, timeout: StateMachineTimeout) {
        if self.tick_sender.send(timeout).is_err() {
            debug!("timeout ticker stopped; dropping {}", timeout.round_step());
        }
    }

    /// Stop the actor. Pending timers never fire.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_ticker(
    mut ticks: UnboundedReceiver<StateMachineTimeout>,
    tocks: UnboundedSender<StateMachineTimeout>,
) {
    let mut latest: Option<RoundStep> = None;
    let mut pending: Option<(StateMachineTimeout, Instant)> = None;

    loop {
        let deadline = pending.as_ref().map(|(_, deadline)| *deadline);
        let timer = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timer);

        tokio::select! {
            tick = ticks.recv() => {
                let Some(timeout) = tick else {
                    break;
                };
                let round_step = timeout.round_step();
                if latest.as_ref().is_some_and(|latest| round_step <= *latest) {
                    debug!(
                        "dropping stale timeout {} (latest {})",
                        round_step,
                        latest.as_ref().map(ToString::to_string).unwrap_or_default(),
                    );
                    continue;
                }
                let now = Instant::now();
                let deadline = now
                    .checked_add(timeout.duration.min(MAX_TIMEOUT))
                    .unwrap_or(now);
                if let Some((replaced, _)) = pending.replace((timeout, deadline)) {
                    trace!("timeout {} superseded by {}", replaced.round_step(), round_step);
                }
                trace!("scheduled {} in {:?}", round_step, timeout.duration);
                latest = Some(round_step);
            }
            () = &mut timer => {
                if let Some((timeout, _)) = pending.take() {
                    debug!("timed out {}", timeout.round_step());
                    if tocks.send(timeout).is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("timeout ticker exited");
}
