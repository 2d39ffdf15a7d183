//! The messenger contract consumed by every channel abstraction.

use std::sync::Arc;

use bytes::Bytes;

/// Callback invoked exactly once with the raw reply to an outbound message.
///
/// A `None` buffer is the distinguished no-op reply: the remote side had no
/// handler for the channel, or explicitly declined to answer.
pub type BinaryReply = Box<dyn FnOnce(Option<Bytes>) + Send + 'static>;

/// Handler for inbound messages on one channel.
///
/// The handler is given the raw message and a [`ReplySender`] it must
/// eventually consume — a `None` reply is valid and means "no response".
/// Dropping the sender without replying leaves the remote caller's pending
/// reply uncollected forever; nothing times it out.
pub type BinaryHandler = Arc<dyn Fn(Option<Bytes>, ReplySender) + Send + Sync + 'static>;

/// Single-use reply conduit handed to a channel handler.
///
/// `send` consumes the sender, so replying more than once is impossible by
/// construction. The sender may outlive the handler invocation and be
/// consumed later from any thread.
pub struct ReplySender {
    reply: BinaryReply,
}

impl ReplySender {
    /// Wrap a raw reply callback.
    pub fn new(reply: BinaryReply) -> Self {
        Self { reply }
    }

    /// A sender whose reply is discarded, for fire-and-forget deliveries.
    pub fn discarding() -> Self {
        Self {
            reply: Box::new(|_| {}),
        }
    }

    /// Deliver the reply.
    pub fn send(self, reply: Option<Bytes>) {
        (self.reply)(reply);
    }
}

impl std::fmt::Debug for ReplySender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySender").finish_non_exhaustive()
    }
}

/// A bidirectional binary-message conduit multiplexed by channel name.
///
/// Messages sent on the same channel are delivered to the remote handler in
/// send order; ordering across channels is unspecified. Registering a
/// handler for a name that already has one silently replaces it.
pub trait Messenger: Send + Sync {
    /// Send a message, ignoring any reply.
    fn send(&self, channel: &str, message: Option<Bytes>);

    /// Send a message and receive the raw reply through `on_reply`.
    ///
    /// The callback fires exactly once — possibly much later, possibly
    /// never if the remote side never replies. Transport failures complete
    /// it with `None`.
    fn send_with_reply(&self, channel: &str, message: Option<Bytes>, on_reply: BinaryReply);

    /// Install or remove the inbound handler for a channel.
    fn set_handler(&self, channel: &str, handler: Option<BinaryHandler>);
}
