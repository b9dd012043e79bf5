use {
    crate::config::ConfigError,
    std::{io, path::PathBuf},
    trv1_consensus_messages::RegistryError,
};

/// Errors returned by the write-ahead log.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be trusted: bad checksum, impossible length, a
    /// partial record in a sealed segment, or a payload the registry rejects.
    #[error("corrupt WAL segment {segment:?} at offset {offset}: {reason}")]
    CorruptLog {
        segment: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("message encoding failed: {0}")]
    Codec(#[from] RegistryError),

    #[error("record of {size} bytes exceeds max_record_size {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("WAL is closed")]
    Closed,

    #[error("invalid WAL configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, WalError>;
