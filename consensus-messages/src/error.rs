//! Error types for the message registry and envelope codec.

use {crate::registry::MessageCode, thiserror::Error};

/// Errors raised while building a registry or encoding/decoding envelopes.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A second codec was registered under an already-used code.
    #[error("duplicate message code {code}: already registered as {existing}")]
    DuplicateCode {
        code: MessageCode,
        /// Name of the variant that owns the code.
        existing: &'static str,
    },

    /// The message's variant has no codec in this registry.
    #[error("no codec registered for message code {code}")]
    UnknownVariant { code: MessageCode },

    /// The bytes are not a well-formed `[code, payload]` envelope, or the
    /// envelope names a code this registry does not know.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A payload failed to serialize or deserialize.
    #[error("payload codec error for {kind}: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: bincode::Error,
    },

    /// A codec was handed a variant it was not registered for.
    #[error("codec for {expected} received a different variant (code {code})")]
    VariantMismatch {
        expected: &'static str,
        code: MessageCode,
    },
}

/// Convenience result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
