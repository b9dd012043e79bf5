//! Inputs to the consensus state machine, as recorded by the WAL.
//!
//! Every input the state machine consumes is one of three variants: a peer
//! message, a fired timeout, or the marker that closes a height. Recording
//! all three, in the order they were applied, is what makes replay after a
//! crash reproduce the same decisions.

use {
    crate::{
        error::{RegistryError, Result},
        message::ConsensusMessage,
        registry::{
            decode_payload, encode_payload, MessageCode, MessageRegistry, RegistryBuilder,
            RegistryMessage,
        },
        types::{ConsensusStep, RoundStep},
    },
    serde::{Deserialize, Serialize},
    std::{sync::Arc, time::Duration},
};

pub const STATE_MACHINE_MESSAGE_CODE: MessageCode = 0;
pub const STATE_MACHINE_TIMEOUT_CODE: MessageCode = 1;
pub const STATE_MACHINE_END_HEIGHT_CODE: MessageCode = 2;

/// A consensus message received from, or sent to, `peer_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachineMessage {
    pub peer_id: String,
    pub msg: ConsensusMessage,
}

/// A scheduled (or fired) timeout for a round step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineTimeout {
    pub duration: Duration,
    pub height: u64,
    pub round: u32,
    pub step: ConsensusStep,
}

impl StateMachineTimeout {
    pub fn new(duration: Duration, height: u64, round: u32, step: ConsensusStep) -> Self {
        Self {
            duration,
            height,
            round,
            step,
        }
    }

    pub fn round_step(&self) -> RoundStep {
        RoundStep::new(self.height, self.round, self.step)
    }
}

/// Marks that every message for `height` has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineEndHeight {
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMachineMsg {
    Message(StateMachineMessage),
    Timeout(StateMachineTimeout),
    EndHeight(StateMachineEndHeight),
}

impl StateMachineMsg {
    pub fn message(peer_id: impl Into<String>, msg: ConsensusMessage) -> Self {
        StateMachineMsg::Message(StateMachineMessage {
            peer_id: peer_id.into(),
            msg,
        })
    }

    pub fn end_height(height: u64) -> Self {
        StateMachineMsg::EndHeight(StateMachineEndHeight { height })
    }

    /// The closed height, if this is an end-height marker.
    pub fn as_end_height(&self) -> Option<u64> {
        match self {
            StateMachineMsg::EndHeight(m) => Some(m.height),
            _ => None,
        }
    }
}

impl From<StateMachineTimeout> for StateMachineMsg {
    fn from(timeout: StateMachineTimeout) -> Self {
        StateMachineMsg::Timeout(timeout)
    }
}

impl RegistryMessage for StateMachineMsg {
    fn code(&self) -> MessageCode {
        match self {
            StateMachineMsg::Message(_) => STATE_MACHINE_MESSAGE_CODE,
            StateMachineMsg::Timeout(_) => STATE_MACHINE_TIMEOUT_CODE,
            StateMachineMsg::EndHeight(_) => STATE_MACHINE_END_HEIGHT_CODE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StateMachineMsg::Message(_) => "state_machine_message",
            StateMachineMsg::Timeout(_) => "state_machine_timeout",
            StateMachineMsg::EndHeight(_) => "state_machine_end_height",
        }
    }
}

/// Serialized form of [`StateMachineMessage`]: the nested message travels as
/// its own envelope.
#[derive(Serialize, Deserialize)]
struct PeerMessagePayload {
    peer_id: String,
    msg: Vec<u8>,
}

/// Build the registry for state machine inputs.
///
/// Peer messages are encoded through `consensus`, the same registry the
/// network layer uses.
pub fn state_machine_registry(
    consensus: Arc<MessageRegistry<ConsensusMessage>>,
) -> Result<MessageRegistry<StateMachineMsg>> {
    const MESSAGE: &str = "state_machine_message";
    let decoder = consensus.clone();
    Ok(RegistryBuilder::new()
        .register(
            STATE_MACHINE_MESSAGE_CODE,
            MESSAGE,
            move |m: &StateMachineMsg| {
                let StateMachineMsg::Message(inner) = m else {
                    return Err(RegistryError::VariantMismatch {
                        expected: MESSAGE,
                        code: m.code(),
                    });
                };
                let payload = PeerMessagePayload {
                    peer_id: inner.peer_id.clone(),
                    msg: consensus.encode(&inner.msg)?,
                };
                encode_payload(MESSAGE, &payload)
            },
            move |bytes: &[u8]| {
                let payload: PeerMessagePayload = decode_payload(MESSAGE, bytes)?;
                Ok(StateMachineMsg::Message(StateMachineMessage {
                    peer_id: payload.peer_id,
                    msg: decoder.decode(&payload.msg)?,
                }))
            },
        )?
        .register_variant(
            STATE_MACHINE_TIMEOUT_CODE,
            "state_machine_timeout",
            |m| match m {
                StateMachineMsg::Timeout(p) => Some(p),
                _ => None,
            },
            StateMachineMsg::Timeout,
        )?
        .register_variant(
            STATE_MACHINE_END_HEIGHT_CODE,
            "state_machine_end_height",
            |m| match m {
                StateMachineMsg::EndHeight(p) => Some(p),
                _ => None,
            },
            StateMachineMsg::EndHeight,
        )?
        .build())
}

/// Both registries, wired together, as a node builds them at startup.
pub fn default_registries() -> Result<(
    Arc<MessageRegistry<ConsensusMessage>>,
    Arc<MessageRegistry<StateMachineMsg>>,
)> {
    let consensus = Arc::new(crate::message::consensus_message_registry()?);
    let state_machine = Arc::new(state_machine_registry(consensus.clone())?);
    Ok((consensus, state_machine))
}
