//! Configuration for the consensus networking layer.

use std::net::{Ipv4Addr, SocketAddr};

/// Configuration for the consensus P2P transport.
#[derive(Debug, Clone)]
pub struct ConsensusNetConfig {
    /// Local address to bind the consensus listener on.
    /// Default: `0.0.0.0:8900`
    pub bind_addr: SocketAddr,

    /// How long to wait for a connect and send before considering it failed (ms).
    pub message_timeout_ms: u64,

    /// Maximum size of a single encoded envelope in bytes.
    /// Votes are a few hundred bytes; proposal blocks can approach 1 MB.
    pub max_message_size: usize,

    /// Size of the inbound message channel buffer.
    pub channel_buffer_size: usize,
}

impl Default for ConsensusNetConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8900)),
            message_timeout_ms: 5_000,
            max_message_size: 1_048_576, // 1 MB
            channel_buffer_size: 10_000,
        }
    }
}

impl ConsensusNetConfig {
    /// Create a config suitable for local testing with shorter timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            message_timeout_ms: 1_000,
            max_message_size: 1_048_576,
            channel_buffer_size: 1_000,
        }
    }
}
