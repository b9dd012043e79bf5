//! Messages exchanged between validators during consensus rounds.
//!
//! These are the payloads the state machine receives from (and sends to)
//! peers. The WAL treats them as opaque: it only ever sees them through their
//! registry envelope, nested inside a `StateMachineMessage`.

use {
    crate::{
        error::Result,
        registry::{MessageCode, MessageRegistry, RegistryBuilder, RegistryMessage},
        types::{ConsensusStep, RoundStep, VoteType},
    },
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
};

/// Announces the sender's current round step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoundStep {
    pub height: u64,
    pub round: u32,
    pub step: ConsensusStep,
    /// Seconds since the sender entered this height.
    pub seconds_since_start_time: u64,
    /// Round of the last commit, `None` when the sender has none.
    pub last_commit_round: Option<u32>,
}

/// Sent when the sender sees a valid block (polka) for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewValidBlock {
    pub height: u64,
    pub round: u32,
    pub block_hash: Hash,
    pub is_commit: bool,
}

/// Tells a peer we already hold a given vote so it is not re-sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasVote {
    pub height: u64,
    pub round: u32,
    pub vote_type: VoteType,
    /// Index of the voter in the validator set.
    pub index: u32,
}

/// A block proposal broadcast by the round's designated proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub height: u64,
    pub round: u32,
    /// Round of the proof-of-lock the proposer is re-proposing under, if any.
    pub pol_round: Option<u32>,
    pub block_hash: Hash,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub proposer: Pubkey,
    pub signature: Vec<u8>,
}

/// A prevote or precommit. `block_hash == None` is a nil vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: u64,
    pub round: u32,
    pub block_hash: Option<Hash>,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub validator: Pubkey,
    pub index: u32,
    pub signature: Vec<u8>,
}

/// Claims a 2/3 majority for `block_hash` in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSetMaj23 {
    pub height: u64,
    pub round: u32,
    pub vote_type: VoteType,
    pub block_hash: Hash,
}

/// Asks a peer for the full block behind a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProposalBlock {
    pub block_hash: Hash,
}

/// Carries a full proposed block. The block codec lives with the ledger, so
/// the block travels as its already-encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalBlock {
    pub block: Vec<u8>,
}

/// Top-level consensus peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    NewRoundStep(NewRoundStep),
    NewValidBlock(NewValidBlock),
    HasVote(HasVote),
    Proposal(Proposal),
    Vote(Vote),
    VoteSetMaj23(VoteSetMaj23),
    GetProposalBlock(GetProposalBlock),
    ProposalBlock(ProposalBlock),
}

pub const NEW_ROUND_STEP_CODE: MessageCode = 0;
pub const NEW_VALID_BLOCK_CODE: MessageCode = 1;
pub const HAS_VOTE_CODE: MessageCode = 2;
pub const PROPOSAL_CODE: MessageCode = 3;
pub const VOTE_CODE: MessageCode = 4;
pub const VOTE_SET_MAJ23_CODE: MessageCode = 5;
pub const GET_PROPOSAL_BLOCK_CODE: MessageCode = 6;
pub const PROPOSAL_BLOCK_CODE: MessageCode = 7;

impl ConsensusMessage {
    /// Returns the height this message belongs to, if it is height-scoped.
    pub fn height(&self) -> Option<u64> {
        match self {
            ConsensusMessage::NewRoundStep(m) => Some(m.height),
            ConsensusMessage::NewValidBlock(m) => Some(m.height),
            ConsensusMessage::HasVote(m) => Some(m.height),
            ConsensusMessage::Proposal(m) => Some(m.height),
            ConsensusMessage::Vote(m) => Some(m.height),
            ConsensusMessage::VoteSetMaj23(m) => Some(m.height),
            ConsensusMessage::GetProposalBlock(_) | ConsensusMessage::ProposalBlock(_) => None,
        }
    }

    /// Returns the round this message belongs to, if it is round-scoped.
    pub fn round(&self) -> Option<u32> {
        match self {
            ConsensusMessage::NewRoundStep(m) => Some(m.round),
            ConsensusMessage::NewValidBlock(m) => Some(m.round),
            ConsensusMessage::HasVote(m) => Some(m.round),
            ConsensusMessage::Proposal(m) => Some(m.round),
            ConsensusMessage::Vote(m) => Some(m.round),
            ConsensusMessage::VoteSetMaj23(m) => Some(m.round),
            ConsensusMessage::GetProposalBlock(_) | ConsensusMessage::ProposalBlock(_) => None,
        }
    }

    /// The announced round step, for `NewRoundStep` messages.
    pub fn round_step(&self) -> Option<RoundStep> {
        match self {
            ConsensusMessage::NewRoundStep(m) => Some(RoundStep::new(m.height, m.round, m.step)),
            _ => None,
        }
    }
}

impl RegistryMessage for ConsensusMessage {
    fn code(&self) -> MessageCode {
        match self {
            ConsensusMessage::NewRoundStep(_) => NEW_ROUND_STEP_CODE,
            ConsensusMessage::NewValidBlock(_) => NEW_VALID_BLOCK_CODE,
            ConsensusMessage::HasVote(_) => HAS_VOTE_CODE,
            ConsensusMessage::Proposal(_) => PROPOSAL_CODE,
            ConsensusMessage::Vote(_) => VOTE_CODE,
            ConsensusMessage::VoteSetMaj23(_) => VOTE_SET_MAJ23_CODE,
            ConsensusMessage::GetProposalBlock(_) => GET_PROPOSAL_BLOCK_CODE,
            ConsensusMessage::ProposalBlock(_) => PROPOSAL_BLOCK_CODE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::NewRoundStep(_) => "new_round_step",
            ConsensusMessage::NewValidBlock(_) => "new_valid_block",
            ConsensusMessage::HasVote(_) => "has_vote",
            ConsensusMessage::Proposal(_) => "proposal",
            ConsensusMessage::Vote(_) => "vote",
            ConsensusMessage::VoteSetMaj23(_) => "vote_set_maj23",
            ConsensusMessage::GetProposalBlock(_) => "get_proposal_block",
            ConsensusMessage::ProposalBlock(_) => "proposal_block",
        }
    }
}

/// Build the registry for peer-to-peer consensus messages.
pub fn consensus_message_registry() -> Result<MessageRegistry<ConsensusMessage>> {
    Ok(RegistryBuilder::new()
        .register_variant(
            NEW_ROUND_STEP_CODE,
            "new_round_step",
            |m| match m {
                ConsensusMessage::NewRoundStep(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::NewRoundStep,
        )?
        .register_variant(
            NEW_VALID_BLOCK_CODE,
            "new_valid_block",
            |m| match m {
                ConsensusMessage::NewValidBlock(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::NewValidBlock,
        )?
        .register_variant(
            HAS_VOTE_CODE,
            "has_vote",
            |m| match m {
                ConsensusMessage::HasVote(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::HasVote,
        )?
        .register_variant(
            PROPOSAL_CODE,
            "proposal",
            |m| match m {
                ConsensusMessage::Proposal(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::Proposal,
        )?
        .register_variant(
            VOTE_CODE,
            "vote",
            |m| match m {
                ConsensusMessage::Vote(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::Vote,
        )?
        .register_variant(
            VOTE_SET_MAJ23_CODE,
            "vote_set_maj23",
            |m| match m {
                ConsensusMessage::VoteSetMaj23(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::VoteSetMaj23,
        )?
        .register_variant(
            GET_PROPOSAL_BLOCK_CODE,
            "get_proposal_block",
            |m| match m {
                ConsensusMessage::GetProposalBlock(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::GetProposalBlock,
        )?
        .register_variant(
            PROPOSAL_BLOCK_CODE,
            "proposal_block",
            |m| match m {
                ConsensusMessage::ProposalBlock(p) => Some(p),
                _ => None,
            },
            ConsensusMessage::ProposalBlock,
        )?
        .build())
}

/// Sample messages, one per variant, for tests in this and dependent crates.
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub fn sample_messages() -> Vec<ConsensusMessage> {
    let hash = Hash::new_from_array([7u8; 32]);
    let validator = Pubkey::new_from_array([9u8; 32]);
    vec![
        ConsensusMessage::NewRoundStep(NewRoundStep {
            height: 100,
            round: 1,
            step: ConsensusStep::Prevote,
            seconds_since_start_time: 3,
            last_commit_round: Some(0),
        }),
        ConsensusMessage::NewValidBlock(NewValidBlock {
            height: 100,
            round: 1,
            block_hash: hash.clone(),
            is_commit: false,
        }),
        ConsensusMessage::HasVote(HasVote {
            height: 100,
            round: 1,
            vote_type: VoteType::Prevote,
            index: 4,
        }),
        ConsensusMessage::Proposal(Proposal {
            height: 100,
            round: 1,
            pol_round: None,
            block_hash: hash.clone(),
            timestamp: 1_700_000_000_000,
            proposer: validator.clone(),
            signature: vec![1, 2, 3, 4],
        }),
        ConsensusMessage::Vote(Vote {
            vote_type: VoteType::Precommit,
            height: 100,
            round: 1,
            block_hash: None,
            timestamp: 1_700_000_000_500,
            validator,
            index: 4,
            signature: vec![5; 96],
        }),
        ConsensusMessage::VoteSetMaj23(VoteSetMaj23 {
            height: 100,
            round: 1,
            vote_type: VoteType::Precommit,
            block_hash: hash.clone(),
        }),
        ConsensusMessage::GetProposalBlock(GetProposalBlock {
            block_hash: hash,
        }),
        ConsensusMessage::ProposalBlock(ProposalBlock {
            block: vec![0xde, 0xad, 0xbe, 0xef],
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_roundtrips() {
        let registry = consensus_message_registry().unwrap();
        let samples = sample_messages();
        assert_eq!(samples.len(), registry.len());
        for msg in samples {
            let bytes = registry.encode(&msg).unwrap();
            assert_eq!(bytes[0], msg.code(), "{}", msg.kind());
            let decoded = registry.decode(&bytes).unwrap();
            assert_eq!(decoded, msg, "{}", msg.kind());
        }
    }

    #[test]
    fn test_codes_are_distinct_and_registered() {
        let registry = consensus_message_registry().unwrap();
        let mut codes: Vec<_> = sample_messages().iter().map(|m| m.code()).collect();
        codes.dedup();
        assert_eq!(codes, registry.codes().collect::<Vec<_>>());
    }

    #[test]
    fn test_accessors() {
        let samples = sample_messages();
        assert_eq!(samples[0].height(), Some(100));
        assert_eq!(samples[0].round(), Some(1));
        assert_eq!(
            samples[0].round_step(),
            Some(RoundStep::new(100, 1, ConsensusStep::Prevote))
        );
        assert_eq!(samples[4].round_step(), None);
        assert_eq!(samples[6].height(), None);
        assert_eq!(samples[7].kind(), "proposal_block");
    }
}
