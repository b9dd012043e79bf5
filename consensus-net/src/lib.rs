//! TRv1 Consensus Networking Layer
//!
//! Carries consensus messages between validators. Messages are encoded by the
//! same [`MessageRegistry`](trv1_consensus_messages::MessageRegistry) the WAL
//! uses, so a vote looks identical on disk and on the wire.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Consensus engine                               │
//!  │  ← InboundMessage<ConsensusMessage>             │
//!  │  → send_message / broadcast_message             │
//!  └──────────────┬──────────────────────────────────┘
//!                 │  registry envelopes
//!  ┌──────────────▼──────────────────────────────────┐
//!  │  Transport (TCP, length-prefixed frames)        │
//!  │  • TransportListener: accepts inbound           │
//!  │  • send_message / broadcast_message: outbound   │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]    | `ConsensusNetConfig` defaults and dev overrides |
//! | [`message`]   | Framing of registry envelopes |
//! | [`transport`] | TCP listener, send/broadcast helpers |
//! | [`error`]     | Crate-wide error enum |

pub mod config;
pub mod error;
pub mod message;
pub mod transport;

pub use {
    config::ConsensusNetConfig,
    error::{ConsensusNetError, Result},
    message::{decode_frame, encode_frame, read_frame_len},
    transport::{
        broadcast_message, send_message, send_on_stream, InboundMessage, TransportHandle,
        TransportListener,
    },
};
