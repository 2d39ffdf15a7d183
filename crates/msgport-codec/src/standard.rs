//! Compact tagged binary codec.
//!
//! Every value is a single type tag byte followed by its payload:
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ Tag (1B)│ Payload (tag-specific)                       │
//! └─────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Length fields use a compact form: one byte below 254, `0xFE` + 2 bytes
//! up to `u16::MAX`, `0xFF` + 4 bytes beyond. Float64 values and the
//! elements of 32/64-bit numeric arrays are padded so their data lands on
//! offsets aligned to the element size, measured from the start of the
//! message buffer. All multi-byte numerics use native byte order on both
//! sides of the wire.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::message::MessageCodec;
use crate::value::Value;

const TAG_NULL: u8 = 0;
const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;
const TAG_I32: u8 = 3;
const TAG_I64: u8 = 4;
const TAG_BIGINT: u8 = 5;
const TAG_F64: u8 = 6;
const TAG_STRING: u8 = 7;
const TAG_BYTE_LIST: u8 = 8;
const TAG_I32_LIST: u8 = 9;
const TAG_I64_LIST: u8 = 10;
const TAG_F64_LIST: u8 = 11;
const TAG_LIST: u8 = 12;
const TAG_MAP: u8 = 13;

/// Self-describing tagged binary codec over [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl MessageCodec for StandardCodec {
    type Message = Value;

    fn encode_message(&self, message: Option<&Value>) -> Result<Option<Bytes>> {
        Ok(message.map(|value| {
            let mut buf = BytesMut::new();
            write_value(&mut buf, value);
            buf.freeze()
        }))
    }

    fn decode_message(&self, message: Option<&[u8]>) -> Result<Option<Value>> {
        match message {
            None => Ok(None),
            Some(bytes) => {
                let mut reader = ValueReader::new(bytes);
                let value = reader.read_value()?;
                reader.expect_done()?;
                Ok(Some(value))
            }
        }
    }
}

/// Write a compact size field.
fn write_size(buf: &mut BytesMut, size: usize) {
    if size < 254 {
        buf.put_u8(size as u8);
    } else if size <= u16::MAX as usize {
        buf.put_u8(254);
        buf.put_u16_ne(size as u16);
    } else {
        buf.put_u8(255);
        buf.put_u32_ne(size as u32);
    }
}

/// Pad with zero bytes until the buffer length is a multiple of `alignment`.
fn write_alignment(buf: &mut BytesMut, alignment: usize) {
    let rem = buf.len() % alignment;
    if rem != 0 {
        for _ in 0..(alignment - rem) {
            buf.put_u8(0);
        }
    }
}

fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u8(TAG_STRING);
    write_size(buf, s.len());
    buf.put_slice(s.as_bytes());
}

/// Append one value to `buf`.
///
/// Alignment is measured from the start of `buf`, so `buf` must begin at
/// the start of the message being built.
pub(crate) fn write_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Null => buf.put_u8(TAG_NULL),
        Value::Bool(true) => buf.put_u8(TAG_TRUE),
        Value::Bool(false) => buf.put_u8(TAG_FALSE),
        Value::I32(v) => {
            buf.put_u8(TAG_I32);
            buf.put_i32_ne(*v);
        }
        Value::I64(v) => {
            buf.put_u8(TAG_I64);
            buf.put_i64_ne(*v);
        }
        Value::BigInt(digits) => {
            buf.put_u8(TAG_BIGINT);
            write_size(buf, digits.len());
            buf.put_slice(digits.as_bytes());
        }
        Value::F64(v) => {
            buf.put_u8(TAG_F64);
            write_alignment(buf, 8);
            buf.put_f64_ne(*v);
        }
        Value::String(s) => write_string(buf, s),
        Value::ByteList(items) => {
            buf.put_u8(TAG_BYTE_LIST);
            write_size(buf, items.len());
            buf.put_slice(items);
        }
        Value::I32List(items) => {
            buf.put_u8(TAG_I32_LIST);
            write_size(buf, items.len());
            write_alignment(buf, 4);
            for item in items {
                buf.put_i32_ne(*item);
            }
        }
        Value::I64List(items) => {
            buf.put_u8(TAG_I64_LIST);
            write_size(buf, items.len());
            write_alignment(buf, 8);
            for item in items {
                buf.put_i64_ne(*item);
            }
        }
        Value::F64List(items) => {
            buf.put_u8(TAG_F64_LIST);
            write_size(buf, items.len());
            write_alignment(buf, 8);
            for item in items {
                buf.put_f64_ne(*item);
            }
        }
        Value::List(items) => {
            buf.put_u8(TAG_LIST);
            write_size(buf, items.len());
            for item in items {
                write_value(buf, item);
            }
        }
        Value::Map(entries) => {
            buf.put_u8(TAG_MAP);
            write_size(buf, entries.len());
            for (key, val) in entries {
                write_string(buf, key);
                write_value(buf, val);
            }
        }
    }
}

/// Positional reader over an encoded message.
///
/// Tracks the absolute offset so alignment padding can be skipped exactly
/// as it was written.
pub(crate) struct ValueReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ValueReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail with `TrailingBytes` unless the reader is exhausted.
    pub(crate) fn expect_done(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(CodecError::TrailingBytes {
                len: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                wanted: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_size(&mut self) -> Result<usize> {
        match self.read_u8()? {
            254 => Ok(u16::from_ne_bytes(self.take(2)?.try_into().unwrap()) as usize),
            255 => Ok(u32::from_ne_bytes(self.take(4)?.try_into().unwrap()) as usize),
            n => Ok(n as usize),
        }
    }

    /// Skip the zero padding written by `write_alignment`.
    fn read_alignment(&mut self, alignment: usize) -> Result<()> {
        let rem = self.pos % alignment;
        if rem != 0 {
            self.take(alignment - rem)?;
        }
        Ok(())
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    /// Read one value.
    pub(crate) fn read_value(&mut self) -> Result<Value> {
        let tag_offset = self.pos;
        let tag = self.read_u8()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_I32 => Ok(Value::I32(i32::from_ne_bytes(
                self.take(4)?.try_into().unwrap(),
            ))),
            TAG_I64 => Ok(Value::I64(i64::from_ne_bytes(
                self.take(8)?.try_into().unwrap(),
            ))),
            TAG_BIGINT => {
                let len = self.read_size()?;
                Ok(Value::BigInt(self.read_utf8(len)?))
            }
            TAG_F64 => {
                self.read_alignment(8)?;
                Ok(Value::F64(f64::from_ne_bytes(
                    self.take(8)?.try_into().unwrap(),
                )))
            }
            TAG_STRING => {
                let len = self.read_size()?;
                Ok(Value::String(self.read_utf8(len)?))
            }
            TAG_BYTE_LIST => {
                let len = self.read_size()?;
                Ok(Value::ByteList(self.take(len)?.to_vec()))
            }
            TAG_I32_LIST => {
                let len = self.read_size()?;
                self.read_alignment(4)?;
                let mut items = Vec::with_capacity(len.min(self.remaining() / 4 + 1));
                for _ in 0..len {
                    items.push(i32::from_ne_bytes(self.take(4)?.try_into().unwrap()));
                }
                Ok(Value::I32List(items))
            }
            TAG_I64_LIST => {
                let len = self.read_size()?;
                self.read_alignment(8)?;
                let mut items = Vec::with_capacity(len.min(self.remaining() / 8 + 1));
                for _ in 0..len {
                    items.push(i64::from_ne_bytes(self.take(8)?.try_into().unwrap()));
                }
                Ok(Value::I64List(items))
            }
            TAG_F64_LIST => {
                let len = self.read_size()?;
                self.read_alignment(8)?;
                let mut items = Vec::with_capacity(len.min(self.remaining() / 8 + 1));
                for _ in 0..len {
                    items.push(f64::from_ne_bytes(self.take(8)?.try_into().unwrap()));
                }
                Ok(Value::F64List(items))
            }
            TAG_LIST => {
                let len = self.read_size()?;
                let mut items = Vec::with_capacity(len.min(self.remaining() + 1));
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                let len = self.read_size()?;
                let mut entries = Vec::with_capacity(len.min(self.remaining() + 1));
                for _ in 0..len {
                    let key = match self.read_value()? {
                        Value::String(key) => key,
                        other => {
                            return Err(CodecError::NonStringKey {
                                found: other.kind(),
                            })
                        }
                    };
                    entries.push((key, self.read_value()?));
                }
                Ok(Value::Map(entries))
            }
            tag => Err(CodecError::UnknownTag {
                tag,
                offset: tag_offset,
            }),
        }
    }
}
