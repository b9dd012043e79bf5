//! TRv1 BFT consensus timing.
//!
//! The consensus state machine never sleeps itself. Whenever it enters a step
//! that can stall (waiting for a proposal, for +2/3 prevotes, for +2/3
//! precommits, or for the commit delay) it asks the [`TimeoutTicker`] for a
//! timeout and keeps processing messages. If the step is still current when
//! the timer fires, the fired [`StateMachineTimeout`] comes back on the
//! ticker's channel, is recorded in the WAL, and moves the round forward.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 consensus engine                 │
//! │   TimeoutConfig::timeout_duration(step, round)   │
//! │                      │                           │
//! │                      ▼                           │
//! │   TimeoutTicker::schedule ──► actor ──► tocks    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! [`StateMachineTimeout`]: trv1_consensus_messages::StateMachineTimeout

pub mod config;
pub mod timeout;

pub use {
    config::{ConfigError, TimeoutConfig},
    timeout::TimeoutTicker,
};
