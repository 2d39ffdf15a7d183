//! In-process messenger pair.
//!
//! The semantic reference implementation of [`Messenger`]: two connected
//! endpoints in one process, where a send on one side dispatches
//! synchronously to the handler registered on the other side. Real
//! transports must behave identically, minus the synchrony.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::trace;

use crate::traits::{BinaryHandler, BinaryReply, Messenger, ReplySender};

struct Router {
    // One handler registry per endpoint side.
    handlers: [Mutex<HashMap<String, BinaryHandler>>; 2],
}

/// One endpoint of a connected in-process messenger pair.
///
/// Dispatch runs on the calling thread: by the time `send` returns, the
/// remote handler has run (though its reply may still be pending if the
/// handler deferred it).
#[derive(Clone)]
pub struct LocalMessenger {
    router: Arc<Router>,
    side: usize,
}

impl LocalMessenger {
    /// Create a connected endpoint pair.
    pub fn pair() -> (LocalMessenger, LocalMessenger) {
        let router = Arc::new(Router {
            handlers: [Mutex::new(HashMap::new()), Mutex::new(HashMap::new())],
        });
        (
            LocalMessenger {
                router: Arc::clone(&router),
                side: 0,
            },
            LocalMessenger { router, side: 1 },
        )
    }

    fn deliver(&self, channel: &str, message: Option<Bytes>, reply: ReplySender) {
        let remote = 1 - self.side;
        let handler = {
            let handlers = self.router.handlers[remote]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handlers.get(channel).cloned()
            // Guard dropped here so the handler can re-enter the messenger.
        };
        match handler {
            Some(handler) => handler(message, reply),
            None => {
                trace!(channel, "no handler registered, replying empty");
                reply.send(None);
            }
        }
    }
}

impl Messenger for LocalMessenger {
    fn send(&self, channel: &str, message: Option<Bytes>) {
        self.deliver(channel, message, ReplySender::discarding());
    }

    fn send_with_reply(&self, channel: &str, message: Option<Bytes>, on_reply: BinaryReply) {
        self.deliver(channel, message, ReplySender::new(on_reply));
    }

    fn set_handler(&self, channel: &str, handler: Option<BinaryHandler>) {
        let mut handlers = self.router.handlers[self.side]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match handler {
            Some(handler) => {
                handlers.insert(channel.to_string(), handler);
            }
            None => {
                handlers.remove(channel);
            }
        }
    }
}

impl std::fmt::Debug for LocalMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMessenger")
            .field("side", &self.side)
            .finish()
    }
}
