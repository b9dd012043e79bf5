//! Height / round / step bookkeeping for the BFT state machine.
//!
//! The triple `(height, round, step)` is totally ordered lexicographically.
//! That ordering is what the timeout ticker uses to decide whether a new
//! timeout supersedes the pending one, and what WAL markers are compared by.

use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// The step within a single consensus round.
///
/// Variants are declared in protocol order so the derived `Ord` matches the
/// order in which a round progresses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum ConsensusStep {
    /// Waiting out the commit timeout before starting the next height.
    #[default]
    NewHeight,
    /// Setting up a new round.
    NewRound,
    /// Waiting for a proposal from the designated leader.
    Propose,
    /// Broadcasting our prevote.
    Prevote,
    /// Saw 2/3+ prevotes for anything; waiting for the prevote timeout.
    PrevoteWait,
    /// Broadcasting our precommit.
    Precommit,
    /// Saw 2/3+ precommits for anything; waiting for the precommit timeout.
    PrecommitWait,
    /// Block has been committed; ready to advance height.
    Commit,
}

impl fmt::Display for ConsensusStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusStep::NewHeight => write!(f, "NewHeight"),
            ConsensusStep::NewRound => write!(f, "NewRound"),
            ConsensusStep::Propose => write!(f, "Propose"),
            ConsensusStep::Prevote => write!(f, "Prevote"),
            ConsensusStep::PrevoteWait => write!(f, "PrevoteWait"),
            ConsensusStep::Precommit => write!(f, "Precommit"),
            ConsensusStep::PrecommitWait => write!(f, "PrecommitWait"),
            ConsensusStep::Commit => write!(f, "Commit"),
        }
    }
}

/// A position of the state machine: `(height, round, step)`.
///
/// Field order matters: the derived `Ord` compares height first, then round,
/// then step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RoundStep {
    pub height: u64,
    pub round: u32,
    pub step: ConsensusStep,
}

impl RoundStep {
    pub fn new(height: u64, round: u32, step: ConsensusStep) -> Self {
        Self {
            height,
            round,
            step,
        }
    }
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.height, self.round, self.step)
    }
}

/// The two kinds of votes cast in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    Prevote,
    Precommit,
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::Prevote => write!(f, "Prevote"),
            VoteType::Precommit => write!(f, "Precommit"),
        }
    }
}
