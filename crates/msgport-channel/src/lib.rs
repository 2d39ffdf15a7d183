//! Named channel abstractions over a binary [`Messenger`].
//!
//! Three channel flavors cover the common messaging shapes:
//!
//! - [`BasicMessageChannel`]: typed messages with optional replies, using
//!   any [`MessageCodec`](msgport_codec::MessageCodec).
//! - [`MethodChannel`]: request/response calls with structured errors.
//! - [`EventChannel`]: a remote-controlled stream of events.
//!
//! Channels of different flavors coexist on one messenger as long as their
//! names differ; a channel owns its name for as long as its handler stays
//! registered.
//!
//! [`Messenger`]: msgport_transport::Messenger

pub mod basic;
pub mod event;
pub mod method;

pub use basic::{BasicMessageChannel, MessageHandler, MessageReply};
pub use event::{EventChannel, EventSink, StreamHandler};
pub use method::{CallResult, MethodCallHandler, MethodChannel, Responder};
