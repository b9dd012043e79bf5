use {
    crate::{
        error::{Result, WalError},
        group::Group,
        record::{read_record, RecordRead, RECORD_HEADER_SIZE},
    },
    log::trace,
    parking_lot::Mutex,
    std::{
        fs::File,
        io::{BufReader, Seek, SeekFrom},
        path::PathBuf,
        sync::Arc,
    },
    trv1_consensus_messages::{MessageRegistry, StateMachineMsg},
};

/// An independent forward-only cursor over the WAL.
///
/// `read()` returns `Ok(None)` at the end of the data written so far. A
/// record the writer has only partly appended is not an error: the cursor
/// stays in front of it and a later `read()` returns it once complete.
pub struct WalReader {
    group: Arc<Mutex<Group>>,
    registry: Arc<MessageRegistry<StateMachineMsg>>,
    max_record_size: usize,
    index: u64,
    offset: u64,
    segment: Option<(BufReader<File>, PathBuf)>,
}

impl WalReader {
    pub(crate) fn new(
        group: Arc<Mutex<Group>>,
        registry: Arc<MessageRegistry<StateMachineMsg>>,
        index: u64,
        offset: u64,
    ) -> Self {
        let max_record_size = group.lock().config().max_record_size;
        Self {
            group,
            registry,
            max_record_size,
            index,
            offset,
            segment: None,
        }
    }

    /// Segment index and byte offset of the next record.
    pub fn position(&self) -> (u64, u64) {
        (self.index, self.offset)
    }

    /// Read the next message, or `None` at end of stream.
    pub fn read(&mut self) -> Result<Option<StateMachineMsg>> {
        loop {
            if self.segment.is_none() {
                let (mut file, path) = self.group.lock().open_for_read(self.index)?;
                if self.offset > 0 {
                    file.seek(SeekFrom::Start(self.offset))?;
                }
                self.segment = Some((file, path));
            }

            // Sampled before reading: if the segment was already sealed, what
            // we read from it is final.
            let sealed = self.is_sealed();
            let Some((file, path)) = self.segment.as_mut() else {
                continue;
            };

            match read_record(file, self.max_record_size)? {
                RecordRead::Record(envelope) => {
                    let at = self.offset;
                    self.offset = self
                        .offset
                        .saturating_add(RECORD_HEADER_SIZE as u64)
                        .saturating_add(envelope.len() as u64);
                    let msg = self
                        .registry
                        .decode(&envelope)
                        .map_err(|e| WalError::CorruptLog {
                            segment: path.clone(),
                            offset: at,
                            reason: e.to_string(),
                        })?;
                    trace!("read {:?} at {}:{}", msg, self.index, at);
                    return Ok(Some(msg));
                }
                RecordRead::Corrupt(reason) => {
                    return Err(WalError::CorruptLog {
                        segment: path.clone(),
                        offset: self.offset,
                        reason,
                    });
                }
                RecordRead::Partial { read } if sealed => {
                    return Err(WalError::CorruptLog {
                        segment: path.clone(),
                        offset: self.offset,
                        reason: format!("segment ends inside a record after {read} bytes"),
                    });
                }
                RecordRead::Eof if sealed => {
                    self.index = self.index.saturating_add(1);
                    self.offset = 0;
                    self.segment = None;
                }
                RecordRead::Eof | RecordRead::Partial { .. } => {
                    file.seek(SeekFrom::Start(self.offset))?;
                    if !self.is_sealed() {
                        return Ok(None);
                    }
                    // Rotated while we were reading; drain the rest of it.
                }
            }
        }
    }

    /// Release the file handle.
    pub fn close(self) {}

    fn is_sealed(&self) -> bool {
        self.index < self.group.lock().max_index()
    }
}

impl Iterator for WalReader {
    type Item = Result<StateMachineMsg>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

impl std::fmt::Debug for WalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalReader")
            .field("index", &self.index)
            .field("offset", &self.offset)
            .finish()
    }
}
