//! Value and method-call codecs for msgport channels.
//!
//! Two codec families live here:
//! - Message codecs ([`MessageCodec`]) map a single value to a byte buffer:
//!   [`BinaryCodec`] (identity), [`StringCodec`] (UTF-8), [`JsonCodec`]
//!   (JSON text), and [`StandardCodec`] (compact tagged binary).
//! - Method codecs ([`MethodCodec`]) frame a method name plus arguments and
//!   the success/error reply envelopes on top of a value encoding:
//!   [`JsonMethodCodec`] and [`StandardMethodCodec`].
//!
//! Codecs are stateless. Decoding malformed input is always an explicit
//! [`CodecError`], never a partial value.

pub mod error;
pub mod json;
pub mod message;
pub mod method;
pub mod standard;
pub mod value;

pub use error::{CodecError, Result};
pub use json::{JsonCodec, JsonMethodCodec};
pub use message::{BinaryCodec, MessageCodec, StringCodec};
pub use method::{CallError, MethodCall, MethodCodec, MethodOutcome, StandardMethodCodec};
pub use standard::StandardCodec;
pub use value::Value;
