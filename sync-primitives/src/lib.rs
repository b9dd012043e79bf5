//! Async coordination primitives used by TRv1 consensus and chain sync.
//!
//! | Module                  | Provides                                              |
//! |-------------------------|-------------------------------------------------------|
//! | [`count_lock`]          | barrier that opens when a counter returns to zero     |
//! | [`rw_lock`]             | batched readers, FIFO writers, writers checked first  |
//! | [`limited_concurrency`] | run at most `limit` tasks, queue the rest in order    |
//! | [`ordered_queue`]       | parallel processing with results emitted by index     |
//! | [`handler_pool`]        | idle/busy handler pool with deadline-bound `get`      |
//! | [`timeout_queue`]       | many cancellable timeouts on one timer                |
//! | [`abortable_timer`]     | a single sleep that `abort()` cuts short              |
//!
//! All state lives behind short `parking_lot` critical sections that never
//! span an `.await`, so every primitive can be shared across runtime threads.

pub mod abortable_timer;
pub mod count_lock;
pub mod error;
pub mod handler_pool;
pub mod limited_concurrency;
pub mod ordered_queue;
pub mod rw_lock;
pub mod timeout_queue;

pub use {
    abortable_timer::{AbortableTimer, WaitOutcome},
    count_lock::CountLock,
    error::{Result, SyncError},
    handler_pool::HandlerPool,
    limited_concurrency::{ConcurrencyHandle, LimitedConcurrency},
    ordered_queue::{OrderedQueue, OrderedQueueConfig, QueueEvent, QueueProcessor},
    rw_lock::{ReadGuard, RwLock, WriteGuard},
    timeout_queue::{TimeoutId, TimeoutQueue},
};
