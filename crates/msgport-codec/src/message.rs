//! Message codec contract plus the two trivial codecs.

use bytes::Bytes;

use crate::error::Result;

/// Bidirectional mapping between a message and a byte buffer.
///
/// A `None` buffer is the distinguished "absent" encoding; every codec maps
/// `None` to `None` in both directions so a no-op reply survives encoding
/// unchanged. Codecs are stateless and cheap to clone.
pub trait MessageCodec: Send + Sync + 'static {
    /// The message type this codec carries.
    type Message: Send;

    /// Encode a message into a buffer.
    fn encode_message(&self, message: Option<&Self::Message>) -> Result<Option<Bytes>>;

    /// Decode a buffer into a message.
    ///
    /// Fails with a [`CodecError`](crate::CodecError) on malformed input;
    /// never returns a partially-decoded message.
    fn decode_message(&self, message: Option<&[u8]>) -> Result<Option<Self::Message>>;
}

/// Pass-through codec: the message IS the buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl MessageCodec for BinaryCodec {
    type Message = Bytes;

    fn encode_message(&self, message: Option<&Bytes>) -> Result<Option<Bytes>> {
        Ok(message.cloned())
    }

    fn decode_message(&self, message: Option<&[u8]>) -> Result<Option<Bytes>> {
        Ok(message.map(Bytes::copy_from_slice))
    }
}

/// UTF-8 string codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl MessageCodec for StringCodec {
    type Message = String;

    fn encode_message(&self, message: Option<&String>) -> Result<Option<Bytes>> {
        Ok(message.map(|s| Bytes::copy_from_slice(s.as_bytes())))
    }

    fn decode_message(&self, message: Option<&[u8]>) -> Result<Option<String>> {
        match message {
            None => Ok(None),
            Some(bytes) => {
                let text = std::str::from_utf8(bytes)?;
                Ok(Some(text.to_string()))
            }
        }
    }
}
