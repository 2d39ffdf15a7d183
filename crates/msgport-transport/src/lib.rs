//! Binary messenger contract and transports for msgport channels.
//!
//! The [`Messenger`] trait is the seam every channel abstraction builds on:
//! a bidirectional binary conduit multiplexed by channel name, with
//! fire-and-forget sends, request/reply sends, and per-channel inbound
//! handlers. Two implementations ship here:
//!
//! - [`LocalMessenger`] — a connected in-process endpoint pair with
//!   synchronous dispatch; the semantic reference implementation.
//! - [`StreamMessenger`] — the same contract over any `Read + Write` byte
//!   stream, using the framed wire format in [`frame`].

pub mod error;
pub mod frame;
pub mod local;
pub mod reader;
pub mod stream;
pub mod traits;
pub mod writer;

pub use error::{Result, TransportError};
pub use frame::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameKind, DEFAULT_MAX_NAME_LEN,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use local::LocalMessenger;
pub use reader::FrameReader;
pub use stream::StreamMessenger;
pub use traits::{BinaryHandler, BinaryReply, Messenger, ReplySender};
pub use writer::FrameWriter;
