/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A type tag byte was not recognized.
    #[error("unknown type tag {tag} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    /// The buffer ended before a complete value was read.
    #[error("truncated message (wanted {wanted} more bytes at offset {offset})")]
    Truncated { offset: usize, wanted: usize },

    /// Bytes remained after the top-level value was decoded.
    #[error("{len} trailing bytes after message")]
    TrailingBytes { len: usize },

    /// A string field contained invalid UTF-8.
    #[error("invalid UTF-8 in message: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// JSON text was malformed or had trailing data.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A map key on the wire was not a string.
    #[error("map key must be a string, got {found}")]
    NonStringKey { found: &'static str },

    /// A decoded method name was not a string.
    #[error("corrupted method call: method name must be a string")]
    CorruptedCall,

    /// A reply envelope had an unknown discriminator or malformed fields.
    #[error("corrupted envelope: {0}")]
    CorruptedEnvelope(&'static str),

    /// The value cannot be represented in this codec.
    #[error("value not representable in this codec: {0}")]
    Unrepresentable(&'static str),
}

pub type Result<T> = std::result::Result<T, CodecError>;
