use {
    crate::{
        config::WalConfig,
        error::{Result, WalError},
        group::Group,
        reader::WalReader,
        record::{encode_record, read_record, RecordRead, RECORD_HEADER_SIZE},
    },
    crossbeam_channel::{bounded, RecvTimeoutError, Sender},
    log::{debug, error, info, trace},
    parking_lot::Mutex,
    std::{
        sync::Arc,
        thread::{Builder, JoinHandle},
    },
    trv1_consensus_messages::{MessageRegistry, RegistryMessage, StateMachineMsg},
};

/// Result of an end-height search: a reader positioned right after the
/// marker for `height`.
#[derive(Debug)]
pub struct EndHeightSearch {
    pub reader: WalReader,
    pub height: u64,
}

/// Write-ahead log of every input applied to the consensus state machine.
///
/// Writes are serialized through the segment group lock. Any number of
/// [`WalReader`]s may read concurrently with the writer.
pub struct Wal {
    group: Arc<Mutex<Group>>,
    registry: Arc<MessageRegistry<StateMachineMsg>>,
    max_record_size: usize,
    checker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl Wal {
    /// Open (or create) the log in `config.dir` and start the background
    /// group checker.
    pub fn open(config: WalConfig, registry: Arc<MessageRegistry<StateMachineMsg>>) -> Result<Self> {
        config.validate()?;
        let max_record_size = config.max_record_size;
        let interval = config.group_check_interval;
        let group = Arc::new(Mutex::new(Group::open(config)?));

        let (exit_sender, exit_receiver) = bounded::<()>(1);
        let checker = {
            let group = group.clone();
            Builder::new()
                .name("trv1WalGroup".to_string())
                .spawn(move || loop {
                    match exit_receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = group.lock().check_limits() {
                                error!("WAL group check failed: {e}");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                })?
        };

        Ok(Self {
            group,
            registry,
            max_record_size,
            checker: Some((exit_sender, checker)),
        })
    }

    /// Append `msg`. With `flush` the record is synced to disk before
    /// returning.
    pub fn write(&self, msg: &StateMachineMsg, flush: bool) -> Result<()> {
        let envelope = self.registry.encode(msg)?;
        if envelope.len() > self.max_record_size {
            return Err(WalError::RecordTooLarge {
                size: envelope.len(),
                max: self.max_record_size,
            });
        }
        let record = encode_record(&envelope);
        self.group.lock().write_record(&record, flush)?;
        trace!("wrote {} ({} bytes, flush={})", msg.kind(), record.len(), flush);
        Ok(())
    }

    /// Append `msg` and sync it to disk.
    pub fn write_sync(&self, msg: &StateMachineMsg) -> Result<()> {
        self.write(msg, true)
    }

    /// Sync everything written so far.
    pub fn flush_and_sync(&self) -> Result<()> {
        self.group.lock().sync()
    }

    /// A reader starting at the oldest segment.
    pub fn new_reader(&self) -> Result<WalReader> {
        let group = self.group.lock();
        if group.is_closed() {
            return Err(WalError::Closed);
        }
        let start = group.min_index();
        drop(group);
        Ok(WalReader::new(
            self.group.clone(),
            self.registry.clone(),
            start,
            0,
        ))
    }

    /// Find the most recent end-height marker.
    ///
    /// Returns `None` if the log holds no marker.
    pub fn search_for_latest_end_height(&self) -> Result<Option<EndHeightSearch>> {
        self.search(|_| true)
    }

    /// Find the marker closing `height`; the reader yields the messages of
    /// `height + 1` onwards.
    pub fn search_for_end_height(&self, height: u64) -> Result<Option<WalReader>> {
        Ok(self
            .search(|h| h == height)?
            .map(|search| search.reader))
    }

    /// Scan segments newest first; within a segment, keep the last marker
    /// matching `accept`.
    fn search(&self, accept: impl Fn(u64) -> bool) -> Result<Option<EndHeightSearch>> {
        let (min_index, max_index) = {
            let group = self.group.lock();
            if group.is_closed() {
                return Err(WalError::Closed);
            }
            (group.min_index(), group.max_index())
        };

        for index in (min_index..=max_index).rev() {
            let (mut file, path) = self.group.lock().open_for_read(index)?;
            let mut offset: u64 = 0;
            let mut found = None;
            loop {
                match read_record(&mut file, self.max_record_size)? {
                    RecordRead::Record(envelope) => {
                        let at = offset;
                        offset = offset
                            .saturating_add(RECORD_HEADER_SIZE as u64)
                            .saturating_add(envelope.len() as u64);
                        let msg = self.registry.decode(&envelope).map_err(|e| {
                            WalError::CorruptLog {
                                segment: path.clone(),
                                offset: at,
                                reason: e.to_string(),
                            }
                        })?;
                        if let Some(height) = msg.as_end_height().filter(|h| accept(*h)) {
                            found = Some((height, offset));
                        }
                    }
                    RecordRead::Corrupt(reason) => {
                        return Err(WalError::CorruptLog {
                            segment: path,
                            offset,
                            reason,
                        });
                    }
                    RecordRead::Eof | RecordRead::Partial { .. } => break,
                }
            }
            if let Some((height, offset)) = found {
                debug!("found end height {height} in segment {index} at offset {offset}");
                return Ok(Some(EndHeightSearch {
                    reader: WalReader::new(
                        self.group.clone(),
                        self.registry.clone(),
                        index,
                        offset,
                    ),
                    height,
                }));
            }
        }
        Ok(None)
    }

    /// Sync, release the head and stop the group checker. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some((exit_sender, checker)) = self.checker.take() {
            drop(exit_sender);
            if checker.join().is_err() {
                error!("WAL group checker panicked");
            }
        }
        let mut group = self.group.lock();
        if !group.is_closed() {
            group.close()?;
            info!("closed WAL {:?}", group.config().dir);
        }
        Ok(())
    }

    /// Close the log and delete every segment file.
    pub fn clear(&mut self) -> Result<()> {
        self.close()?;
        self.group.lock().remove_files()
    }

    /// Number of segments, head included.
    pub fn segment_count(&self) -> u64 {
        let group = self.group.lock();
        group.max_index().saturating_sub(group.min_index()).saturating_add(1)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close WAL: {e}");
        }
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let group = self.group.lock();
        f.debug_struct("Wal")
            .field("dir", &group.config().dir)
            .field("min_index", &group.min_index())
            .field("max_index", &group.max_index())
            .field("head_size", &group.head_size())
            .field("closed", &group.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        assert_matches::assert_matches,
        solana_hash::Hash,
        std::{fs, io::Write, time::Duration},
        tempfile::TempDir,
        trv1_consensus_messages::{
            default_registries,
            message::{GetProposalBlock, ProposalBlock},
            ConsensusMessage, ConsensusStep, StateMachineTimeout,
        },
    };

    fn registry() -> Arc<MessageRegistry<StateMachineMsg>> {
        default_registries().unwrap().1
    }

    fn open(dir: &TempDir) -> Wal {
        Wal::open(WalConfig::dev_default(dir.path()), registry()).unwrap()
    }

    fn peer_msg(peer: &str, seed: u8) -> StateMachineMsg {
        StateMachineMsg::message(
            peer,
            ConsensusMessage::GetProposalBlock(GetProposalBlock {
                block_hash: Hash::new_from_array([seed; 32]),
            }),
        )
    }

    fn read_all(wal: &Wal) -> Vec<StateMachineMsg> {
        wal.new_reader()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_reads_back_in_write_order() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        let msgs = vec![
            peer_msg("a", 1),
            StateMachineTimeout::new(Duration::from_millis(10), 1, 0, ConsensusStep::Propose)
                .into(),
            peer_msg("b", 2),
            StateMachineMsg::end_height(1),
        ];
        for (i, msg) in msgs.iter().enumerate() {
            wal.write(msg, i % 2 == 0).unwrap();
        }
        assert_eq!(read_all(&wal), msgs);
    }

    #[test]
    fn test_empty_log_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        let mut reader = wal.new_reader().unwrap();
        assert_matches!(reader.read(), Ok(None));
        assert!(wal.search_for_latest_end_height().unwrap().is_none());
    }

    #[test]
    fn test_durable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let mut wal = open(&dir);
        wal.write_sync(&peer_msg("a", 9)).unwrap();
        wal.close().unwrap();
        drop(wal);

        let wal = open(&dir);
        assert_eq!(read_all(&wal), vec![peer_msg("a", 9)]);
    }

    #[test]
    fn test_latest_end_height() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        wal.write_sync(&StateMachineMsg::end_height(100)).unwrap();
        wal.write(&peer_msg("peer1", 1), false).unwrap();
        wal.write_sync(&StateMachineMsg::end_height(101)).unwrap();
        wal.write(&peer_msg("peer2", 2), false).unwrap();

        let EndHeightSearch { reader, height } =
            wal.search_for_latest_end_height().unwrap().unwrap();
        assert_eq!(height, 101);
        let rest = reader.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rest, vec![peer_msg("peer2", 2)]);
    }

    #[test]
    fn test_search_for_specific_end_height() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        wal.write(&StateMachineMsg::end_height(5), false).unwrap();
        wal.write(&peer_msg("x", 1), false).unwrap();
        wal.write(&StateMachineMsg::end_height(6), false).unwrap();

        let reader = wal.search_for_end_height(5).unwrap().unwrap();
        let rest = reader.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rest, vec![peer_msg("x", 1), StateMachineMsg::end_height(6)]);
        assert!(wal.search_for_end_height(7).unwrap().is_none());
    }

    #[test]
    fn test_reader_sees_later_writes() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        wal.write(&peer_msg("a", 1), false).unwrap();
        let mut reader = wal.new_reader().unwrap();
        assert_eq!(reader.read().unwrap(), Some(peer_msg("a", 1)));
        assert_eq!(reader.read().unwrap(), None);

        wal.write(&peer_msg("b", 2), false).unwrap();
        assert_eq!(reader.read().unwrap(), Some(peer_msg("b", 2)));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_reader_waits_on_partial_record() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        wal.write_sync(&peer_msg("a", 1)).unwrap();

        let envelope = registry().encode(&peer_msg("b", 2)).unwrap();
        let record = encode_record(&envelope);
        let head = dir.path().join("WAL");
        let mut file = fs::OpenOptions::new().append(true).open(&head).unwrap();
        file.write_all(&record[..10]).unwrap();

        let mut reader = wal.new_reader().unwrap();
        assert_eq!(reader.read().unwrap(), Some(peer_msg("a", 1)));
        assert_eq!(reader.read().unwrap(), None);

        file.write_all(&record[10..]).unwrap();
        assert_eq!(reader.read().unwrap(), Some(peer_msg("b", 2)));
    }

    #[test]
    fn test_reader_crosses_rotation() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        wal.write(&peer_msg("a", 1), false).unwrap();
        let mut reader = wal.new_reader().unwrap();
        assert_eq!(reader.read().unwrap(), Some(peer_msg("a", 1)));

        wal.write(&peer_msg("b", 2), false).unwrap();
        wal.group.lock().rotate().unwrap();
        wal.write(&peer_msg("c", 3), false).unwrap();

        assert_eq!(reader.read().unwrap(), Some(peer_msg("b", 2)));
        assert_eq!(reader.read().unwrap(), Some(peer_msg("c", 3)));
        assert_eq!(reader.read().unwrap(), None);
        assert_eq!(reader.position().0, 1);
    }

    #[test]
    fn test_record_too_large() {
        let dir = TempDir::new().unwrap();
        let mut config = WalConfig::dev_default(dir.path());
        config.max_record_size = 64;
        let wal = Wal::open(config, registry()).unwrap();
        let msg = StateMachineMsg::message(
            "peer",
            ConsensusMessage::ProposalBlock(ProposalBlock {
                block: vec![0u8; 128],
            }),
        );
        assert_matches!(
            wal.write(&msg, false),
            Err(WalError::RecordTooLarge { max: 64, .. })
        );
    }

    #[test]
    fn test_debug_reports_head_size() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir);
        wal.write(&peer_msg("a", 1), true).unwrap();
        let size = fs::metadata(dir.path().join("WAL")).unwrap().len();
        assert!(size > 0);
        assert!(format!("{wal:?}").contains(&format!("head_size: {size}")));
    }

    #[test]
    fn test_write_after_close() {
        let dir = TempDir::new().unwrap();
        let mut wal = open(&dir);
        wal.close().unwrap();
        wal.close().unwrap();
        assert_matches!(wal.write(&peer_msg("a", 1), false), Err(WalError::Closed));
        assert_matches!(wal.new_reader(), Err(WalError::Closed));
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let mut wal = open(&dir);
        wal.write(&peer_msg("a", 1), false).unwrap();
        wal.group.lock().rotate().unwrap();
        wal.write(&peer_msg("b", 2), false).unwrap();
        wal.clear().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
