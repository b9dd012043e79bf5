//! Message registry and envelope codec.
//!
//! Every message that crosses a process boundary (disk or wire) is written as
//! an envelope of exactly two fields:
//!
//! ```text
//! [code: u8][payload: u64-le length || payload bytes]
//! ```
//!
//! `code` selects the codec that produced `payload`. Both fields use bincode
//! with fixed-width little-endian integers, and decoding rejects trailing
//! bytes, so an envelope with anything other than exactly those two fields is
//! malformed.
//!
//! A registry is assembled once with [`RegistryBuilder`] at startup and is
//! immutable afterwards; callers share it behind an `Arc` and hand it to the
//! WAL and the network layer, which is what guarantees a message looks the
//! same on disk and on the wire.

use {
    crate::error::{RegistryError, Result},
    bincode::Options,
    log::trace,
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::collections::BTreeMap,
};

/// Numeric discriminant of a registered message variant.
pub type MessageCode = u8;

/// A message type whose variants carry an explicit registry discriminant.
pub trait RegistryMessage: Sized + Send + Sync + 'static {
    /// The code under which this variant is registered.
    fn code(&self) -> MessageCode;

    /// A short human-readable tag for logging.
    fn kind(&self) -> &'static str;
}

type EncodeFn<M> = Box<dyn Fn(&M) -> Result<Vec<u8>> + Send + Sync>;
type DecodeFn<M> = Box<dyn Fn(&[u8]) -> Result<M> + Send + Sync>;

struct Codec<M> {
    name: &'static str,
    encode: EncodeFn<M>,
    decode: DecodeFn<M>,
}

/// The on-disk / on-wire wrapper.
#[derive(Serialize, Deserialize)]
struct Envelope {
    code: MessageCode,
    payload: Vec<u8>,
}

/// bincode configuration shared by envelopes and payloads.
fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serialize a payload with the registry's bincode configuration.
pub fn encode_payload<T: Serialize>(kind: &'static str, value: &T) -> Result<Vec<u8>> {
    codec_options()
        .serialize(value)
        .map_err(|source| RegistryError::Payload { kind, source })
}

/// Deserialize a payload with the registry's bincode configuration.
pub fn decode_payload<T: DeserializeOwned>(kind: &'static str, bytes: &[u8]) -> Result<T> {
    codec_options()
        .deserialize(bytes)
        .map_err(|source| RegistryError::Payload { kind, source })
}

/// Collects codecs during startup. Consumed by [`RegistryBuilder::build`].
pub struct RegistryBuilder<M> {
    codecs: BTreeMap<MessageCode, Codec<M>>,
}

impl<M: RegistryMessage> Default for RegistryBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RegistryMessage> RegistryBuilder<M> {
    pub fn new() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Register an arbitrary codec under `code`.
    ///
    /// Fails with [`RegistryError::DuplicateCode`] if `code` is taken.
    pub fn register<E, D>(
        mut self,
        code: MessageCode,
        name: &'static str,
        encode: E,
        decode: D,
    ) -> Result<Self>
    where
        E: Fn(&M) -> Result<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<M> + Send + Sync + 'static,
    {
        if let Some(existing) = self.codecs.get(&code) {
            return Err(RegistryError::DuplicateCode {
                code,
                existing: existing.name,
            });
        }
        self.codecs.insert(
            code,
            Codec {
                name,
                encode: Box::new(encode),
                decode: Box::new(decode),
            },
        );
        Ok(self)
    }

    /// Register a variant whose payload is a plain serde type `P`.
    ///
    /// `project` borrows the payload out of the message (returning `None` for
    /// any other variant) and `wrap` rebuilds the message from a decoded
    /// payload.
    pub fn register_variant<P>(
        self,
        code: MessageCode,
        name: &'static str,
        project: fn(&M) -> Option<&P>,
        wrap: fn(P) -> M,
    ) -> Result<Self>
    where
        P: Serialize + DeserializeOwned + 'static,
    {
        self.register(
            code,
            name,
            move |msg: &M| {
                let payload = project(msg).ok_or(RegistryError::VariantMismatch {
                    expected: name,
                    code: msg.code(),
                })?;
                encode_payload(name, payload)
            },
            move |bytes: &[u8]| decode_payload::<P>(name, bytes).map(wrap),
        )
    }

    /// Freeze the registry.
    pub fn build(self) -> MessageRegistry<M> {
        MessageRegistry {
            codecs: self.codecs,
        }
    }
}

/// An immutable code → codec table.
pub struct MessageRegistry<M> {
    codecs: BTreeMap<MessageCode, Codec<M>>,
}

impl<M: RegistryMessage> MessageRegistry<M> {
    /// Encode `msg` into a `[code, payload]` envelope.
    pub fn encode(&self, msg: &M) -> Result<Vec<u8>> {
        let code = msg.code();
        let codec = self
            .codecs
            .get(&code)
            .ok_or(RegistryError::UnknownVariant { code })?;
        let payload = (codec.encode)(msg)?;
        let envelope = Envelope { code, payload };
        let bytes = codec_options().serialize(&envelope).map_err(|source| {
            RegistryError::Payload {
                kind: codec.name,
                source,
            }
        })?;
        trace!("encoded {} ({} bytes)", codec.name, bytes.len());
        Ok(bytes)
    }

    /// Decode an envelope produced by [`MessageRegistry::encode`].
    pub fn decode(&self, bytes: &[u8]) -> Result<M> {
        let envelope: Envelope = codec_options()
            .deserialize(bytes)
            .map_err(|e| RegistryError::MalformedEnvelope(e.to_string()))?;
        let codec = self.codecs.get(&envelope.code).ok_or_else(|| {
            RegistryError::MalformedEnvelope(format!("unknown message code {}", envelope.code))
        })?;
        (codec.decode)(&envelope.payload)
    }

    /// Whether a codec is registered for `code`.
    pub fn contains(&self, code: MessageCode) -> bool {
        self.codecs.contains_key(&code)
    }

    /// Name the variant registered under `code`.
    pub fn name_of(&self, code: MessageCode) -> Option<&'static str> {
        self.codecs.get(&code).map(|codec| codec.name)
    }

    /// Registered codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = MessageCode> + '_ {
        self.codecs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl<M> std::fmt::Debug for RegistryBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.codecs.iter().map(|(code, codec)| (code, codec.name)))
            .finish()
    }
}

impl<M> std::fmt::Debug for MessageRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.codecs.iter().map(|(code, codec)| (code, codec.name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        nonce: u64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pong {
        nonce: u64,
        from: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TestMsg {
        Ping(Ping),
        Pong(Pong),
    }

    impl RegistryMessage for TestMsg {
        fn code(&self) -> MessageCode {
            match self {
                TestMsg::Ping(_) => 1,
                TestMsg::Pong(_) => 2,
            }
        }

        fn kind(&self) -> &'static str {
            match self {
                TestMsg::Ping(_) => "ping",
                TestMsg::Pong(_) => "pong",
            }
        }
    }

    fn ping_only() -> RegistryBuilder<TestMsg> {
        RegistryBuilder::new()
            .register_variant(
                1,
                "ping",
                |m| match m {
                    TestMsg::Ping(p) => Some(p),
                    _ => None,
                },
                TestMsg::Ping,
            )
            .unwrap()
    }

    fn full_registry() -> MessageRegistry<TestMsg> {
        ping_only()
            .register_variant(
                2,
                "pong",
                |m| match m {
                    TestMsg::Pong(p) => Some(p),
                    _ => None,
                },
                TestMsg::Pong,
            )
            .unwrap()
            .build()
    }

    #[test]
    fn test_roundtrip() {
        let registry = full_registry();
        let msg = TestMsg::Pong(Pong {
            nonce: 7,
            from: "peer-a".to_string(),
        });
        let bytes = registry.encode(&msg).unwrap();
        assert_eq!(bytes[0], 2);
        assert_eq!(registry.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let result = ping_only().register_variant(
            1,
            "pong",
            |m| match m {
                TestMsg::Pong(p) => Some(p),
                _ => None,
            },
            TestMsg::Pong,
        );
        assert_matches!(
            result,
            Err(RegistryError::DuplicateCode {
                code: 1,
                existing: "ping"
            })
        );
        assert_eq!(format!("{:?}", ping_only()), r#"{1: "ping"}"#);
    }

    #[test]
    fn test_unregistered_variant_cannot_be_encoded() {
        let registry = ping_only().build();
        let msg = TestMsg::Pong(Pong {
            nonce: 1,
            from: String::new(),
        });
        assert_matches!(
            registry.encode(&msg),
            Err(RegistryError::UnknownVariant { code: 2 })
        );
    }

    #[test]
    fn test_unknown_code_is_malformed() {
        let full = full_registry();
        let bytes = full
            .encode(&TestMsg::Pong(Pong {
                nonce: 1,
                from: String::new(),
            }))
            .unwrap();
        let registry = ping_only().build();
        assert_matches!(
            registry.decode(&bytes),
            Err(RegistryError::MalformedEnvelope(_))
        );
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let registry = full_registry();
        let mut bytes = registry.encode(&TestMsg::Ping(Ping { nonce: 3 })).unwrap();
        bytes.push(0);
        assert_matches!(
            registry.decode(&bytes),
            Err(RegistryError::MalformedEnvelope(_))
        );
    }

    #[test]
    fn test_truncated_envelope_is_malformed() {
        let registry = full_registry();
        let bytes = registry.encode(&TestMsg::Ping(Ping { nonce: 3 })).unwrap();
        assert_matches!(
            registry.decode(&bytes[..bytes.len() - 1]),
            Err(RegistryError::MalformedEnvelope(_))
        );
        assert_matches!(
            registry.decode(&[]),
            Err(RegistryError::MalformedEnvelope(_))
        );
    }

    #[test]
    fn test_introspection() {
        let registry = full_registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(1));
        assert!(!registry.contains(3));
        assert_eq!(registry.name_of(2), Some("pong"));
        assert_eq!(registry.codes().collect::<Vec<_>>(), vec![1, 2]);
    }
}
