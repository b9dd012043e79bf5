//! Per-step timeout configuration.
//!
//! Every waiting step of a round has a base timeout that grows linearly with
//! the round number, so that a height stuck behind slow proposers or a
//! partitioned network eventually gives every step enough time.

use {std::time::Duration, trv1_consensus_messages::ConsensusStep};

/// Timeouts for the consensus steps, in milliseconds.
///
/// The effective timeout for a step at round `r` is `base + delta * r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Base timeout for the propose step.
    /// Default: 3000.
    pub propose_ms: u64,

    /// Additional propose timeout per round.
    /// Default: 500.
    pub propose_delta_ms: u64,

    /// Base timeout for collecting prevotes after +2/3 of any prevote.
    /// Default: 1000.
    pub prevote_ms: u64,

    /// Default: 500.
    pub prevote_delta_ms: u64,

    /// Base timeout for collecting precommits after +2/3 of any precommit.
    /// Default: 1000.
    pub precommit_ms: u64,

    /// Default: 500.
    pub precommit_delta_ms: u64,

    /// Wait after committing a block before starting the next height.
    /// Default: 1000.
    pub commit_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            propose_ms: 3000,
            propose_delta_ms: 500,
            prevote_ms: 1000,
            prevote_delta_ms: 500,
            precommit_ms: 1000,
            precommit_delta_ms: 500,
            commit_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    /// Millisecond-scale timeouts for tests.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            propose_ms: 40,
            propose_delta_ms: 5,
            prevote_ms: 10,
            prevote_delta_ms: 5,
            precommit_ms: 10,
            precommit_delta_ms: 5,
            commit_ms: 10,
        }
    }

    /// Timeout for `step` at `round`.
    ///
    /// `NewHeight` and `NewRound` lead straight into a proposal and use the
    /// propose timeout; the wait steps share the timeout of the vote they
    /// are waiting on.
    pub fn timeout_duration(&self, step: ConsensusStep, round: u32) -> Duration {
        let (base, delta) = match step {
            ConsensusStep::NewHeight | ConsensusStep::NewRound | ConsensusStep::Propose => {
                (self.propose_ms, self.propose_delta_ms)
            }
            ConsensusStep::Prevote | ConsensusStep::PrevoteWait => {
                (self.prevote_ms, self.prevote_delta_ms)
            }
            ConsensusStep::Precommit | ConsensusStep::PrecommitWait => {
                (self.precommit_ms, self.precommit_delta_ms)
            }
            ConsensusStep::Commit => (self.commit_ms, 0),
        };
        Duration::from_millis(base.saturating_add(delta.saturating_mul(u64::from(round))))
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.propose_ms == 0 {
            return Err(ConfigError::InvalidTimeout("propose_ms"));
        }
        if self.prevote_ms == 0 {
            return Err(ConfigError::InvalidTimeout("prevote_ms"));
        }
        if self.precommit_ms == 0 {
            return Err(ConfigError::InvalidTimeout("precommit_ms"));
        }
        Ok(())
    }
}

/// Errors in timeout configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be > 0")]
    InvalidTimeout(&'static str),
}
