//! Error types for the consensus networking layer.

use {thiserror::Error, trv1_consensus_messages::RegistryError};

/// Errors that can occur in the consensus networking layer.
#[derive(Error, Debug)]
pub enum ConsensusNetError {
    /// The registry could not encode or decode a message.
    #[error("codec error: {0}")]
    Codec(#[from] RegistryError),

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A message timed out waiting for delivery.
    #[error("message timeout after {0}ms")]
    Timeout(u64),

    /// The channel used to deliver messages to the consensus engine is closed.
    #[error("consensus channel closed")]
    ChannelClosed,

    /// The message could not be prepared for sending.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Convenience result type for consensus networking operations.
pub type Result<T> = std::result::Result<T, ConsensusNetError>;
