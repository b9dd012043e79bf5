use std::time::Duration;

/// Errors returned by the synchronization primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// `CountLock::decrease` would take the counter below zero.
    #[error("cannot decrease count {count} by {by}")]
    InvalidDecrease { count: u64, by: u64 },

    /// The read queue already holds `max` waiting readers.
    #[error("read queue is full ({max} waiting)")]
    ReadQueueFull { max: usize },

    #[error("read lock not acquired within {0:?}")]
    ReadTimeout(Duration),

    /// A concurrency limit of zero was requested.
    #[error("concurrency limit must be > 0, got {0}")]
    InvalidLimit(usize),

    #[error("task panicked")]
    TaskPanicked,

    #[error("no handler became available within {0:?}")]
    GetHandlerTimeout(Duration),

    #[error("timer is already waiting")]
    AlreadyWaiting,

    /// The operation was abandoned because its owner shut down or aborted.
    #[error("aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, SyncError>;
