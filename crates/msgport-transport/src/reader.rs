use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::error::{Result, TransportError};
use crate::frame::{decode_frame, Frame, FrameConfig};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(TransportError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, &self.config)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                return Err(TransportError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;

    use super::*;
    use crate::frame::{encode_frame, HEADER_SIZE};
    use crate::writer::FrameWriter;

    fn wire_for(frames: &[Frame]) -> Vec<u8> {
        let config = FrameConfig::default();
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &config, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let wire = wire_for(&[Frame::message("ch", Some(Bytes::from_static(b"hello")))]);
        let mut reader = FrameReader::new(Cursor::new(wire));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.channel, "ch");
        assert_eq!(frame.payload, Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn read_multiple_frames() {
        let wire = wire_for(&[
            Frame::message("one", None),
            Frame::request(7, "two", Some(Bytes::from_static(b"x"))),
            Frame::reply(7, None),
        ]);
        let mut reader = FrameReader::new(Cursor::new(wire));

        assert_eq!(reader.read_frame().unwrap().channel, "one");
        assert_eq!(reader.read_frame().unwrap().correlation, 7);
        assert_eq!(reader.read_frame().unwrap().correlation, 7);
    }

    #[test]
    fn partial_read_handling() {
        let wire = wire_for(&[Frame::message("slow", Some(Bytes::from_static(b"drip")))]);
        let mut reader = FrameReader::new(ByteByByteReader { bytes: wire, pos: 0 });
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.channel, "slow");
        assert_eq!(frame.payload, Some(Bytes::from_static(b"drip")));
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut wire = wire_for(&[Frame::message("ch", Some(Bytes::from_static(b"payload")))]);
        wire.truncate(HEADER_SIZE + 1);
        let mut reader = FrameReader::new(Cursor::new(wire));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer
            .write_frame(&Frame::request(3, "ping", Some(Bytes::from_static(b"?"))))
            .unwrap();
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.correlation, 3);
        assert_eq!(frame.channel, "ping");
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }
}
