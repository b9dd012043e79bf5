//! On-disk record framing.
//!
//! ```text
//! [crc32: u32-le][len: u32-le][envelope: len bytes]
//! ```
//!
//! The checksum covers the envelope bytes only. A record whose header claims
//! more than `max_record_size` bytes is corrupt rather than merely partial.

use std::io::{self, Read};

pub(crate) const RECORD_HEADER_SIZE: usize = 8;

/// Outcome of reading one record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RecordRead {
    /// A complete, checksum-valid envelope.
    Record(Vec<u8>),
    /// Clean end of file at a record boundary.
    Eof,
    /// The file ends inside a record after `read` bytes of it.
    Partial { read: usize },
    /// The record is complete but cannot be trusted.
    Corrupt(String),
}

/// Frame an encoded envelope for the log.
pub(crate) fn encode_record(envelope: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE.saturating_add(envelope.len()));
    record.extend_from_slice(&crc32fast::hash(envelope).to_le_bytes());
    record.extend_from_slice(&(envelope.len() as u32).to_le_bytes());
    record.extend_from_slice(envelope);
    record
}

/// Read one record from `reader`.
pub(crate) fn read_record<R: Read>(reader: &mut R, max_record_size: usize) -> io::Result<RecordRead> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    let n = read_full(reader, &mut header)?;
    if n == 0 {
        return Ok(RecordRead::Eof);
    }
    if n < RECORD_HEADER_SIZE {
        return Ok(RecordRead::Partial { read: n });
    }

    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > max_record_size {
        return Ok(RecordRead::Corrupt(format!(
            "record length {len} exceeds max_record_size {max_record_size}"
        )));
    }

    let mut envelope = vec![0u8; len];
    let n = read_full(reader, &mut envelope)?;
    if n < len {
        return Ok(RecordRead::Partial {
            read: RECORD_HEADER_SIZE.saturating_add(n),
        });
    }

    let actual = crc32fast::hash(&envelope);
    if actual != crc {
        return Ok(RecordRead::Corrupt(format!(
            "checksum mismatch: stored {crc:#010x}, computed {actual:#010x}"
        )));
    }
    Ok(RecordRead::Record(envelope))
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled = filled.saturating_add(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
