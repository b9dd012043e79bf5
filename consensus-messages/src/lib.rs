//! TRv1 consensus message types and envelope codec.
//!
//! The same registry-driven codec encodes consensus messages for the WAL and
//! for the wire, so a message looks identical in both places:
//!
//! ```text
//!   ConsensusMessage ──► consensus registry ──► [code, payload] ──► network
//!          │
//!          ▼
//!   StateMachineMsg  ──► state machine registry ──► [code, payload] ──► WAL
//!   (Message | Timeout | EndHeight)
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`]         | `ConsensusStep`, `RoundStep`, `VoteType` |
//! | [`registry`]      | Code → codec table and the `[code, payload]` envelope |
//! | [`message`]       | Peer-to-peer consensus messages |
//! | [`state_machine`] | WAL-recorded state machine inputs |
//! | [`error`]         | Registry error enum |

pub mod error;
pub mod message;
pub mod registry;
pub mod state_machine;
pub mod types;

pub use {
    error::RegistryError,
    message::{consensus_message_registry, ConsensusMessage},
    registry::{MessageCode, MessageRegistry, RegistryBuilder, RegistryMessage},
    state_machine::{
        default_registries, state_machine_registry, StateMachineEndHeight, StateMachineMessage,
        StateMachineMsg, StateMachineTimeout,
    },
    types::{ConsensusStep, RoundStep, VoteType},
};
