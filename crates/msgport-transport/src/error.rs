/// Errors that can occur in messenger transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4D50 \"MP\")")]
    InvalidMagic,

    /// The frame kind byte was not recognized.
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The channel name exceeds the configured maximum length.
    #[error("channel name too long ({len} bytes, max {max})")]
    NameTooLong { len: usize, max: usize },

    /// The channel name on the wire was not valid UTF-8.
    #[error("channel name is not valid UTF-8")]
    InvalidName,

    /// An I/O error occurred while reading or writing frames.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
