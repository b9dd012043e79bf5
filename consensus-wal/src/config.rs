//! WAL configuration.

use std::{path::PathBuf, time::Duration};

/// Name of the head segment; rotated tails are `WAL.000`, `WAL.001`, ...
pub const HEAD_FILE_NAME: &str = "WAL";

/// Configuration for the consensus write-ahead log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the segment files.
    pub dir: PathBuf,

    /// Size in bytes above which the head segment is rotated into the tail.
    /// Default: 10 MiB.
    pub head_size_limit: u64,

    /// Total size in bytes of all segments above which the oldest tails are
    /// deleted. Zero disables the limit.
    /// Default: 1 GiB.
    pub total_size_limit: u64,

    /// How often the background checker looks at the size limits.
    /// Default: 5 seconds.
    pub group_check_interval: Duration,

    /// Largest encoded message accepted by `write` and by readers. A record
    /// header claiming more than this is treated as corruption.
    /// Default: 1 MiB.
    pub max_record_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("consensus-wal"),
            head_size_limit: 10 * 1024 * 1024,
            total_size_limit: 1024 * 1024 * 1024,
            group_check_interval: Duration::from_secs(5),
            max_record_size: 1024 * 1024,
        }
    }
}

impl WalConfig {
    /// Default limits rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Small limits and a fast checker, for tests.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            head_size_limit: 4096,
            total_size_limit: 0,
            group_check_interval: Duration::from_millis(50),
            max_record_size: 64 * 1024,
        }
    }

    /// Path of the head segment.
    pub fn head_path(&self) -> PathBuf {
        self.dir.join(HEAD_FILE_NAME)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.head_size_limit == 0 {
            return Err(ConfigError::InvalidHeadSizeLimit);
        }
        if self.group_check_interval.is_zero() {
            return Err(ConfigError::InvalidCheckInterval);
        }
        if self.max_record_size == 0 || self.max_record_size > u32::MAX as usize {
            return Err(ConfigError::InvalidMaxRecordSize(self.max_record_size));
        }
        Ok(())
    }
}

/// Errors in WAL configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("head_size_limit must be > 0")]
    InvalidHeadSizeLimit,
    #[error("group_check_interval must be > 0")]
    InvalidCheckInterval,
    #[error("max_record_size must be in [1, u32::MAX], got {0}")]
    InvalidMaxRecordSize(usize),
}
