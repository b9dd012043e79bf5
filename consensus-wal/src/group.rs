//! Segment group: one head file plus numbered tails.
//!
//! ```text
//!   WAL.000  WAL.001  ...  WAL.{max-1}   WAL
//!   └────── tails, oldest first ──────┘  head (index = max_index)
//! ```
//!
//! The head always has index `max_index`; rotating renames it to
//! `WAL.{max_index:03}` and opens a fresh head one index higher. All
//! mutation goes through the owning `Mutex`, so a rotation never lands
//! between the two halves of a record.

use {
    crate::{
        config::{WalConfig, HEAD_FILE_NAME},
        error::Result,
        record::{read_record, RecordRead},
    },
    log::{debug, error, info, warn},
    std::{
        fs::{self, File, OpenOptions},
        io::{self, BufReader, Write},
        path::{Path, PathBuf},
    },
};

pub(crate) struct Group {
    config: WalConfig,
    head: Option<File>,
    head_size: u64,
    min_index: u64,
    max_index: u64,
}

impl Group {
    /// Open the group in `config.dir`, creating the directory and an empty
    /// head if needed. A trailing incomplete record in the head is cut off.
    pub(crate) fn open(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let mut tails = tail_indices(&config.dir)?;
        tails.sort_unstable();
        let max_index = tails.last().map_or(0, |last| last.saturating_add(1));
        let min_index = tails.first().copied().unwrap_or(max_index);

        let head_path = config.head_path();
        if head_path.exists() {
            repair_head(&head_path, config.max_record_size)?;
        }
        let head = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&head_path)?;
        let head_size = head.metadata()?.len();

        info!(
            "opened WAL group {:?}: segments {}..={} head_size {}",
            config.dir, min_index, max_index, head_size
        );

        Ok(Self {
            config,
            head: Some(head),
            head_size,
            min_index,
            max_index,
        })
    }

    pub(crate) fn config(&self) -> &WalConfig {
        &self.config
    }

    pub(crate) fn min_index(&self) -> u64 {
        self.min_index
    }

    /// Index of the head segment.
    pub(crate) fn max_index(&self) -> u64 {
        self.max_index
    }

    /// Bytes in the head segment.
    pub(crate) fn head_size(&self) -> u64 {
        self.head_size
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.head.is_none()
    }

    /// Path of the segment with `index`.
    pub(crate) fn segment_path(&self, index: u64) -> PathBuf {
        if index >= self.max_index {
            self.config.head_path()
        } else {
            tail_path(&self.config.dir, index)
        }
    }

    /// Open segment `index` for reading. Resolving the path and opening the
    /// file happen under the group lock, so the handle refers to the segment
    /// that had this index at call time even if a rotation follows.
    pub(crate) fn open_for_read(&self, index: u64) -> io::Result<(BufReader<File>, PathBuf)> {
        let path = self.segment_path(index);
        let file = File::open(&path)?;
        Ok((BufReader::new(file), path))
    }

    /// Append one framed record to the head.
    pub(crate) fn write_record(&mut self, record: &[u8], sync: bool) -> Result<()> {
        let head = self.head.as_mut().ok_or(crate::error::WalError::Closed)?;
        head.write_all(record)?;
        if sync {
            head.sync_data()?;
        }
        self.head_size = self.head_size.saturating_add(record.len() as u64);
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        if let Some(head) = self.head.as_mut() {
            head.flush()?;
            head.sync_data()?;
        }
        Ok(())
    }

    /// Rotate the head if it grew past `head_size_limit`, then trim the
    /// oldest tails while the group exceeds `total_size_limit`.
    pub(crate) fn check_limits(&mut self) -> Result<()> {
        if self.head.is_none() {
            return Ok(());
        }
        if self.head_size >= self.config.head_size_limit {
            self.rotate()?;
        }
        if self.config.total_size_limit > 0 {
            self.enforce_total_size_limit()?;
        }
        Ok(())
    }

    /// Seal the head as tail `max_index` and open an empty head.
    ///
    /// On failure the current head stays open and writable.
    pub(crate) fn rotate(&mut self) -> Result<()> {
        let head_path = self.config.head_path();
        self.head
            .as_ref()
            .ok_or(crate::error::WalError::Closed)?
            .sync_all()?;
        let sealed = tail_path(&self.config.dir, self.max_index);
        fs::rename(&head_path, &sealed)?;
        let head = match OpenOptions::new().create(true).append(true).open(&head_path) {
            Ok(head) => head,
            Err(e) => {
                // The old handle still points at the renamed file.
                if let Err(undo) = fs::rename(&sealed, &head_path) {
                    error!("failed to restore WAL head from {sealed:?}: {undo}");
                }
                return Err(e.into());
            }
        };
        self.max_index = self.max_index.saturating_add(1);
        self.head = Some(head);
        info!(
            "rotated WAL head ({} bytes) into {:?}",
            self.head_size, sealed
        );
        self.head_size = 0;
        Ok(())
    }

    fn enforce_total_size_limit(&mut self) -> Result<()> {
        let mut total = self.head_size;
        for index in self.min_index..self.max_index {
            total = total.saturating_add(segment_len(&tail_path(&self.config.dir, index)));
        }
        while total > self.config.total_size_limit && self.min_index < self.max_index {
            let oldest = tail_path(&self.config.dir, self.min_index);
            let len = segment_len(&oldest);
            match fs::remove_file(&oldest) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            warn!(
                "WAL group over total_size_limit {}: removed {:?} ({} bytes)",
                self.config.total_size_limit, oldest, len
            );
            total = total.saturating_sub(len);
            self.min_index = self.min_index.saturating_add(1);
        }
        Ok(())
    }

    /// Sync and release the head. Further writes fail with `Closed`.
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Some(head) = self.head.take() {
            head.sync_all()?;
            debug!("closed WAL head {:?}", self.config.head_path());
        }
        Ok(())
    }

    /// Delete every segment file. The group must be closed.
    pub(crate) fn remove_files(&mut self) -> Result<()> {
        let head_path = self.config.head_path();
        if head_path.exists() {
            fs::remove_file(&head_path)?;
        }
        for index in tail_indices(&self.config.dir)? {
            fs::remove_file(tail_path(&self.config.dir, index))?;
        }
        self.head_size = 0;
        self.min_index = 0;
        self.max_index = 0;
        info!("cleared WAL group {:?}", self.config.dir);
        Ok(())
    }
}

pub(crate) fn tail_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{HEAD_FILE_NAME}.{index:03}"))
}

fn segment_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Indices of `WAL.NNN` files in `dir`, unordered.
fn tail_indices(dir: &Path) -> Result<Vec<u64>> {
    let prefix = format!("{HEAD_FILE_NAME}.");
    let mut indices = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = name
            .strip_prefix(&prefix)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        {
            indices.push(index);
        }
    }
    Ok(indices)
}

/// Truncate a head whose last record was cut short by a crash.
///
/// Stops at the first corrupt record without modifying anything; that
/// record is reported to readers instead.
fn repair_head(path: &Path, max_record_size: usize) -> Result<()> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut good: u64 = 0;
    loop {
        match read_record(&mut reader, max_record_size)? {
            RecordRead::Record(envelope) => {
                good = good
                    .saturating_add(crate::record::RECORD_HEADER_SIZE as u64)
                    .saturating_add(envelope.len() as u64);
            }
            RecordRead::Eof | RecordRead::Corrupt(_) => return Ok(()),
            RecordRead::Partial { read } => {
                warn!(
                    "truncating incomplete trailing WAL record in {:?}: {} of {} bytes kept ({} dropped)",
                    path,
                    good,
                    len,
                    read
                );
                OpenOptions::new().write(true).open(path)?.set_len(good)?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::record::encode_record,
        tempfile::TempDir,
    };

    fn group(dir: &TempDir) -> Group {
        Group::open(WalConfig::dev_default(dir.path())).unwrap()
    }

    #[test]
    fn test_open_creates_head() {
        let dir = TempDir::new().unwrap();
        let group = group(&dir);
        assert!(dir.path().join("WAL").exists());
        assert_eq!(group.min_index(), 0);
        assert_eq!(group.max_index(), 0);
        assert_eq!(group.head_size(), 0);
    }

    #[test]
    fn test_rotate_numbers_tails() {
        let dir = TempDir::new().unwrap();
        let mut group = group(&dir);
        group.write_record(&encode_record(b"a"), false).unwrap();
        group.rotate().unwrap();
        group.write_record(&encode_record(b"b"), false).unwrap();
        group.rotate().unwrap();
        assert_eq!(group.max_index(), 2);
        assert!(dir.path().join("WAL.000").exists());
        assert!(dir.path().join("WAL.001").exists());
        assert_eq!(group.segment_path(2), dir.path().join("WAL"));
        assert_eq!(group.segment_path(1), dir.path().join("WAL.001"));

        group.close().unwrap();
        let reopened = Group::open(WalConfig::dev_default(dir.path())).unwrap();
        assert_eq!(reopened.min_index(), 0);
        assert_eq!(reopened.max_index(), 2);
    }

    #[test]
    fn test_check_limits_rotates_only_past_limit() {
        let dir = TempDir::new().unwrap();
        let mut config = WalConfig::dev_default(dir.path());
        config.head_size_limit = 32;
        let mut group = Group::open(config).unwrap();
        group.write_record(&encode_record(b"tiny"), false).unwrap();
        group.check_limits().unwrap();
        assert_eq!(group.max_index(), 0);
        group.write_record(&encode_record(&[0u8; 32]), false).unwrap();
        group.check_limits().unwrap();
        assert_eq!(group.max_index(), 1);
        assert_eq!(group.head_size(), 0);
    }

    #[test]
    fn test_total_size_limit_removes_oldest() {
        let dir = TempDir::new().unwrap();
        let mut config = WalConfig::dev_default(dir.path());
        config.head_size_limit = 1;
        config.total_size_limit = 40;
        let mut group = Group::open(config).unwrap();
        for _ in 0..4 {
            group.write_record(&encode_record(&[1u8; 12]), false).unwrap();
            group.check_limits().unwrap();
        }
        // Four 20-byte tails, at most two fit under the limit.
        assert_eq!(group.max_index(), 4);
        assert_eq!(group.min_index(), 2);
        assert!(!dir.path().join("WAL.000").exists());
        assert!(!dir.path().join("WAL.001").exists());
        assert!(dir.path().join("WAL.002").exists());
    }

    #[test]
    fn test_repair_truncates_partial_record() {
        let dir = TempDir::new().unwrap();
        let head = dir.path().join("WAL");
        let mut bytes = encode_record(b"complete");
        let complete = bytes.len() as u64;
        bytes.extend_from_slice(&encode_record(b"cut short")[..6]);
        fs::write(&head, &bytes).unwrap();

        let group = group(&dir);
        assert_eq!(group.head_size(), complete);
        assert_eq!(fs::metadata(&head).unwrap().len(), complete);
    }

    #[test]
    fn test_repair_leaves_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let head = dir.path().join("WAL");
        let mut bytes = encode_record(b"payload");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        fs::write(&head, &bytes).unwrap();

        let group = group(&dir);
        assert_eq!(group.head_size(), bytes.len() as u64);
    }

    #[test]
    fn test_remove_files() {
        let dir = TempDir::new().unwrap();
        let mut group = group(&dir);
        group.write_record(&encode_record(b"a"), false).unwrap();
        group.rotate().unwrap();
        group.close().unwrap();
        group.remove_files().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_rotation_keeps_head_writable() {
        let dir = TempDir::new().unwrap();
        let mut group = group(&dir);
        group.write_record(&encode_record(b"before"), false).unwrap();
        let size = group.head_size();

        // A non-empty directory in the way makes the rename fail.
        let blocker = dir.path().join("WAL.000");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();
        assert!(group.rotate().is_err());

        assert!(!group.is_closed());
        assert_eq!(group.max_index(), 0);
        assert_eq!(group.head_size(), size);
        group.write_record(&encode_record(b"after"), true).unwrap();

        fs::remove_dir_all(&blocker).unwrap();
        group.rotate().unwrap();
        assert_eq!(group.max_index(), 1);
        let sealed = fs::read(dir.path().join("WAL.000")).unwrap();
        let mut expected = encode_record(b"before");
        expected.extend_from_slice(&encode_record(b"after"));
        assert_eq!(sealed, expected);
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mut group = group(&dir);
        group.close().unwrap();
        assert!(group.is_closed());
        assert!(matches!(
            group.write_record(&encode_record(b"a"), true),
            Err(crate::error::WalError::Closed)
        ));
    }
}
