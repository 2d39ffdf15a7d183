use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Frame header: magic (2) + kind (1) + flags (1) + correlation (8)
/// + name length (2) + payload length (4) = 18 bytes.
pub const HEADER_SIZE: usize = 18;

/// Magic bytes: "MP" (0x4D 0x50).
pub const MAGIC: [u8; 2] = [0x4D, 0x50];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default maximum channel-name length: 1 KiB.
pub const DEFAULT_MAX_NAME_LEN: usize = 1024;

/// Payload-presence flag. A frame without it carries the distinguished
/// "absent" payload, which is not the same as an empty one.
const FLAG_HAS_PAYLOAD: u8 = 0x01;

/// What a frame means to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Fire-and-forget message; no reply expected.
    Message = 0,
    /// Message expecting a reply carrying the same correlation id.
    Request = 1,
    /// Reply to an earlier request.
    Reply = 2,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(FrameKind::Message),
            1 => Ok(FrameKind::Request),
            2 => Ok(FrameKind::Reply),
            other => Err(TransportError::UnknownKind(other)),
        }
    }
}

/// A framed message with channel routing and reply correlation.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬───────────┬──────────────┬──────────┬──────────┬──────┬─────────┐
/// │ Magic (2B) │ Kind(1B) │ Flags(1B) │ Corr (8B LE) │ NameLen  │ PayLen   │ Name │ Payload │
/// │ 0x4D 0x50  │ 0|1|2    │ bit0=has  │              │ (2B LE)  │ (4B LE)  │      │         │
/// └────────────┴──────────┴───────────┴──────────────┴──────────┴──────────┴──────┴─────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    /// Correlation id linking a `Reply` to its `Request`; 0 for messages.
    pub correlation: u64,
    /// Destination channel name. Empty for replies, which route by
    /// correlation id instead.
    pub channel: String,
    pub payload: Option<Bytes>,
}

impl Frame {
    /// A fire-and-forget message.
    pub fn message(channel: impl Into<String>, payload: Option<Bytes>) -> Self {
        Self {
            kind: FrameKind::Message,
            correlation: 0,
            channel: channel.into(),
            payload,
        }
    }

    /// A request expecting a correlated reply.
    pub fn request(correlation: u64, channel: impl Into<String>, payload: Option<Bytes>) -> Self {
        Self {
            kind: FrameKind::Request,
            correlation,
            channel: channel.into(),
            payload,
        }
    }

    /// A reply to an earlier request.
    pub fn reply(correlation: u64, payload: Option<Bytes>) -> Self {
        Self {
            kind: FrameKind::Reply,
            correlation,
            channel: String::new(),
            payload,
        }
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.channel.len() + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Maximum channel-name length in bytes. Default: 1 KiB.
    pub max_name_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

/// Encode a frame into the wire format.
pub fn encode_frame(frame: &Frame, config: &FrameConfig, dst: &mut BytesMut) -> Result<()> {
    let payload_len = frame.payload.as_ref().map_or(0, |p| p.len());
    if payload_len > config.max_payload_size {
        return Err(TransportError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }
    if frame.channel.len() > config.max_name_len {
        return Err(TransportError::NameTooLong {
            len: frame.channel.len(),
            max: config.max_name_len,
        });
    }

    let flags = if frame.payload.is_some() {
        FLAG_HAS_PAYLOAD
    } else {
        0
    };

    dst.reserve(frame.wire_size());
    dst.put_slice(&MAGIC);
    dst.put_u8(frame.kind as u8);
    dst.put_u8(flags);
    dst.put_u64_le(frame.correlation);
    dst.put_u16_le(frame.channel.len() as u16);
    dst.put_u32_le(payload_len as u32);
    dst.put_slice(frame.channel.as_bytes());
    if let Some(payload) = &frame.payload {
        dst.put_slice(payload);
    }
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let kind = FrameKind::from_byte(src[2])?;
    let flags = src[3];
    let correlation = u64::from_le_bytes(src[4..12].try_into().unwrap());
    let name_len = u16::from_le_bytes(src[12..14].try_into().unwrap()) as usize;
    let payload_len = u32::from_le_bytes(src[14..18].try_into().unwrap()) as usize;

    if name_len > config.max_name_len {
        return Err(TransportError::NameTooLong {
            len: name_len,
            max: config.max_name_len,
        });
    }
    if payload_len > config.max_payload_size {
        return Err(TransportError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let total = HEADER_SIZE + name_len + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let name_bytes = src.split_to(name_len);
    let channel = std::str::from_utf8(&name_bytes)
        .map_err(|_| TransportError::InvalidName)?
        .to_string();
    let payload_bytes = src.split_to(payload_len).freeze();
    let payload = (flags & FLAG_HAS_PAYLOAD != 0).then_some(payload_bytes);

    Ok(Some(Frame {
        kind,
        correlation,
        channel,
        payload,
    }))
}
