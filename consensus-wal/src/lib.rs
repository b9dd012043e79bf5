//! Crash-recovery log for the TRv1 consensus state machine.
//!
//! Every [`StateMachineMsg`](trv1_consensus_messages::StateMachineMsg) the
//! engine applies is appended here before it takes effect. On restart the
//! engine calls [`Wal::search_for_latest_end_height`] and replays the
//! messages recorded for the height that was still open.
//!
//! On disk the log is a directory with a head segment `WAL` and rotated
//! tails `WAL.000`, `WAL.001`, ... in creation order. Each record is
//! `[crc32][len][envelope]`, where the envelope comes from the shared
//! message registry.

pub mod config;
pub mod error;
mod group;
pub mod reader;
mod record;
pub mod wal;

pub use {
    config::{ConfigError, WalConfig},
    error::{Result, WalError},
    reader::WalReader,
    wal::{EndHeightSearch, Wal},
};
