//! Basic message channel: arbitrary value exchange with optional replies.

use std::sync::{Arc, Mutex};

use msgport_codec::{CallError, CodecError, MessageCodec};
use msgport_transport::{Messenger, ReplySender};
use tracing::error;

/// Handler for inbound messages on a [`BasicMessageChannel`].
///
/// The handler must eventually consume the [`MessageReply`]; an `Err`
/// return is logged and, if no reply was sent yet, answered with an empty
/// reply so the remote caller is not left waiting.
pub type MessageHandler<C> = Arc<
    dyn Fn(Option<<C as MessageCodec>::Message>, MessageReply<C>) -> Result<(), CallError>
        + Send
        + Sync,
>;

/// A named channel for sending codec-typed messages.
///
/// Thin descriptor over the messenger: holds no state of its own and can be
/// recreated freely for the same name.
pub struct BasicMessageChannel<C: MessageCodec> {
    messenger: Arc<dyn Messenger>,
    name: String,
    codec: C,
}

impl<C: MessageCodec + Clone> BasicMessageChannel<C> {
    pub fn new(messenger: Arc<dyn Messenger>, name: impl Into<String>, codec: C) -> Self {
        Self {
            messenger,
            name: name.into(),
            codec,
        }
    }

    /// The channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a message, ignoring any reply.
    pub fn send(&self, message: Option<&C::Message>) -> Result<(), CodecError> {
        let bytes = self.codec.encode_message(message)?;
        self.messenger.send(&self.name, bytes);
        Ok(())
    }

    /// Send a message and receive the decoded reply through `on_reply`.
    ///
    /// A reply that fails to decode is logged and dropped; `on_reply` is
    /// not invoked in that case.
    pub fn send_with_reply<F>(&self, message: Option<&C::Message>, on_reply: F) -> Result<(), CodecError>
    where
        F: FnOnce(Option<C::Message>) + Send + 'static,
    {
        let bytes = self.codec.encode_message(message)?;
        let codec = self.codec.clone();
        let channel = self.name.clone();
        self.messenger.send_with_reply(
            &self.name,
            bytes,
            Box::new(move |reply| match codec.decode_message(reply.as_deref()) {
                Ok(message) => on_reply(message),
                Err(err) => {
                    error!(channel = %channel, error = %err, "failed to decode reply");
                }
            }),
        );
        Ok(())
    }

    /// Install or remove the inbound message handler.
    ///
    /// Installing replaces any previous handler for this channel name.
    pub fn set_message_handler(&self, handler: Option<MessageHandler<C>>) {
        let Some(handler) = handler else {
            self.messenger.set_handler(&self.name, None);
            return;
        };

        let codec = self.codec.clone();
        let channel = self.name.clone();
        self.messenger.set_handler(
            &self.name,
            Some(Arc::new(move |message, reply| {
                let message = match codec.decode_message(message.as_deref()) {
                    Ok(message) => message,
                    Err(err) => {
                        error!(channel = %channel, error = %err, "failed to decode message");
                        reply.send(None);
                        return;
                    }
                };

                let message_reply = MessageReply {
                    core: Arc::new(ReplyCore {
                        channel: channel.clone(),
                        codec: codec.clone(),
                        slot: Mutex::new(Some(reply)),
                    }),
                };
                let watchdog = Arc::clone(&message_reply.core);
                if let Err(err) = handler(message, message_reply) {
                    error!(channel = %channel, error = %err, "message handler failed");
                    if let Some(sender) = watchdog.try_take() {
                        sender.send(None);
                    }
                }
            })),
        );
    }
}

struct ReplyCore<C: MessageCodec> {
    channel: String,
    codec: C,
    slot: Mutex<Option<ReplySender>>,
}

impl<C: MessageCodec> ReplyCore<C> {
    fn try_take(&self) -> Option<ReplySender> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Single-use reply sink handed to a message handler.
///
/// # Panics
///
/// Replying a second time is a programming defect and panics with
/// "reply already submitted".
pub struct MessageReply<C: MessageCodec> {
    core: Arc<ReplyCore<C>>,
}

impl<C: MessageCodec> MessageReply<C> {
    /// Encode and send the reply. A `None` message sends the distinguished
    /// empty reply.
    pub fn send(&self, message: Option<&C::Message>) {
        let Some(sender) = self.core.try_take() else {
            panic!(
                "reply already submitted on channel {}",
                self.core.channel
            );
        };
        match self.core.codec.encode_message(message) {
            Ok(bytes) => sender.send(bytes),
            Err(err) => {
                error!(channel = %self.core.channel, error = %err, "failed to encode reply");
                sender.send(None);
            }
        }
    }
}
