//! Wire framing for registry envelopes.
//!
//! The payload of every frame is the `[code, payload]` envelope produced by
//! the shared message registry, the same bytes the WAL stores:
//!
//! ```text
//! [len: u32-le][envelope: len bytes]
//! ```

use {
    crate::error::{ConsensusNetError, Result},
    trv1_consensus_messages::{MessageRegistry, RegistryMessage},
};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Encode `msg` and prepend the length prefix.
pub fn encode_frame<M: RegistryMessage>(
    registry: &MessageRegistry<M>,
    msg: &M,
    max_size: usize,
) -> Result<Vec<u8>> {
    let envelope = registry.encode(msg)?;
    if envelope.len() > max_size || envelope.len() > u32::MAX as usize {
        return Err(ConsensusNetError::MessageTooLarge {
            size: envelope.len(),
            max: max_size,
        });
    }
    let len = envelope.len() as u32;
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE.saturating_add(envelope.len()));
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&envelope);
    Ok(buf)
}

/// Read the length prefix from a 4-byte buffer.
pub fn read_frame_len(header: &[u8; FRAME_HEADER_SIZE]) -> usize {
    u32::from_le_bytes(*header) as usize
}

/// Decode a frame body (the envelope, without its length prefix).
pub fn decode_frame<M: RegistryMessage>(registry: &MessageRegistry<M>, body: &[u8]) -> Result<M> {
    Ok(registry.decode(body)?)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        assert_matches::assert_matches,
        trv1_consensus_messages::{
            consensus_message_registry, message::HasVote, ConsensusMessage, RegistryError,
            VoteType,
        },
    };

    fn has_vote() -> ConsensusMessage {
        ConsensusMessage::HasVote(HasVote {
            height: 10,
            round: 1,
            vote_type: VoteType::Precommit,
            index: 3,
        })
    }

    #[test]
    fn test_frame_carries_registry_envelope() {
        let registry = consensus_message_registry().unwrap();
        let msg = has_vote();
        let framed = encode_frame(&registry, &msg, 1_048_576).unwrap();
        let len = read_frame_len(framed[..FRAME_HEADER_SIZE].try_into().unwrap());
        assert_eq!(len, framed.len() - FRAME_HEADER_SIZE);
        // Same bytes the WAL embeds.
        assert_eq!(&framed[FRAME_HEADER_SIZE..], &registry.encode(&msg).unwrap()[..]);
        assert_eq!(
            decode_frame(&registry, &framed[FRAME_HEADER_SIZE..]).unwrap(),
            msg
        );
    }

    #[test]
    fn test_message_too_large() {
        let registry = consensus_message_registry().unwrap();
        assert_matches!(
            encode_frame(&registry, &has_vote(), 1),
            Err(ConsensusNetError::MessageTooLarge { max: 1, .. })
        );
    }

    #[test]
    fn test_garbage_body_is_codec_error() {
        let registry = consensus_message_registry().unwrap();
        assert_matches!(
            decode_frame(&registry, &[0xFF; 3]),
            Err(ConsensusNetError::Codec(RegistryError::MalformedEnvelope(_)))
        );
    }
}
