//! Named message channels with pluggable codecs over byte transports.
//!
//! msgport moves structured messages between two peers over named logical
//! channels. It is split into three layers, each usable on its own:
//!
//! - [`codec`] — Message serialization: a tagged binary format, a JSON
//!   format, and raw string/byte codecs, plus method-call envelopes
//! - [`transport`] — The [`Messenger`](transport::Messenger) contract and
//!   two implementations: in-process pairs and framed byte streams
//! - [`channel`] — Typed channel flavors: basic messages, method calls,
//!   and event streams
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use msgport::channel::MethodChannel;
//! use msgport::codec::{StandardMethodCodec, Value};
//! use msgport::transport::LocalMessenger;
//!
//! let (host, guest) = LocalMessenger::pair();
//! let host = MethodChannel::new(Arc::new(host), "greeter", StandardMethodCodec);
//! let guest = MethodChannel::new(Arc::new(guest), "greeter", StandardMethodCodec);
//!
//! guest.set_method_call_handler(Some(Arc::new(|call, responder| {
//!     let name = call.arguments.as_str().unwrap_or("world");
//!     responder.success(Value::String(format!("hello, {name}")));
//!     Ok(())
//! })));
//!
//! host.invoke_with_reply("greet", Value::from("msgport"), |result| {
//!     println!("{result:?}");
//! })?;
//! # Ok::<(), msgport::codec::CodecError>(())
//! ```

/// Re-export codec types.
pub mod codec {
    pub use msgport_codec::*;
}

/// Re-export transport types.
pub mod transport {
    pub use msgport_transport::*;
}

/// Re-export channel types.
pub mod channel {
    pub use msgport_channel::*;
}
