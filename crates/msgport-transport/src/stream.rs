//! Messenger over a byte stream.
//!
//! Runs the [`Messenger`] contract across any `Read + Write` pair (a Unix
//! socket pair, a pipe, a TCP stream) using the frame format from
//! [`crate::frame`]. A background dispatch thread owns the read half:
//! inbound messages and requests are routed to the registered channel
//! handlers, inbound replies complete the pending reply callback matching
//! their correlation id.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::frame::{Frame, FrameConfig, FrameKind};
use crate::reader::FrameReader;
use crate::traits::{BinaryHandler, BinaryReply, Messenger, ReplySender};
use crate::writer::FrameWriter;

struct Shared {
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    handlers: Mutex<HashMap<String, BinaryHandler>>,
    pending: Mutex<HashMap<u64, BinaryReply>>,
    next_correlation: AtomicU64,
}

impl Shared {
    fn write_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_frame(frame)
    }

    fn write_reply(&self, correlation: u64, payload: Option<Bytes>) {
        if let Err(err) = self.write_frame(&Frame::reply(correlation, payload)) {
            warn!(correlation, error = %err, "failed to write reply frame");
        }
    }

    fn handler_for(&self, channel: &str) -> Option<BinaryHandler> {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.get(channel).cloned()
    }
}

/// [`Messenger`] over a `Read + Write` byte stream.
///
/// Handlers run on the dispatch thread in frame-arrival order, which gives
/// per-channel FIFO delivery. Replies may be sent from any thread via the
/// [`ReplySender`] handed to the handler.
///
/// The dispatch thread exits on EOF or a read error, completing every
/// still-pending reply callback with `None` so callers observe the
/// not-implemented default instead of hanging on a dead connection.
pub struct StreamMessenger {
    shared: Arc<Shared>,
}

impl StreamMessenger {
    /// Spawn a messenger over independently-owned read and write halves,
    /// with default frame configuration.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::with_config(reader, writer, FrameConfig::default())
    }

    /// Spawn a messenger with explicit frame configuration.
    pub fn with_config<R, W>(reader: R, writer: W, config: FrameConfig) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(FrameWriter::with_config(
                Box::new(writer) as Box<dyn Write + Send>,
                config.clone(),
            )),
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_correlation: AtomicU64::new(1),
        });

        // The thread holds only a weak reference so dropping the messenger
        // releases the write half even while the reader is still blocked.
        let weak = Arc::downgrade(&shared);
        let frame_reader = FrameReader::with_config(reader, config);
        std::thread::Builder::new()
            .name("msgport-dispatch".to_string())
            .spawn(move || dispatch_loop(weak, frame_reader))
            .expect("failed to spawn dispatch thread");

        Self { shared }
    }
}

fn dispatch_loop<R: Read>(shared: Weak<Shared>, mut reader: FrameReader<R>) {
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(TransportError::ConnectionClosed) => {
                debug!("stream closed, stopping dispatch");
                break;
            }
            Err(err) => {
                warn!(error = %err, "frame read failed, stopping dispatch");
                break;
            }
        };

        let Some(shared) = shared.upgrade() else {
            debug!("messenger dropped, stopping dispatch");
            return;
        };
        handle_frame(&shared, frame);
    }

    // Complete whatever is still waiting so callers see the no-op reply
    // instead of hanging on a dead connection.
    if let Some(shared) = shared.upgrade() {
        let pending: Vec<BinaryReply> = {
            let mut pending = shared
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.drain().map(|(_, reply)| reply).collect()
        };
        if !pending.is_empty() {
            warn!(count = pending.len(), "completing pending replies after close");
        }
        for reply in pending {
            reply(None);
        }
    }
}

fn handle_frame(shared: &Arc<Shared>, frame: Frame) {
    match frame.kind {
        FrameKind::Message => match shared.handler_for(&frame.channel) {
            Some(handler) => handler(frame.payload, ReplySender::discarding()),
            None => trace!(channel = %frame.channel, "dropping message for unhandled channel"),
        },
        FrameKind::Request => {
            let correlation = frame.correlation;
            match shared.handler_for(&frame.channel) {
                Some(handler) => {
                    let reply_shared = Arc::clone(shared);
                    let reply = ReplySender::new(Box::new(move |payload| {
                        reply_shared.write_reply(correlation, payload);
                    }));
                    handler(frame.payload, reply);
                }
                None => {
                    trace!(channel = %frame.channel, "unhandled request, replying empty");
                    shared.write_reply(correlation, None);
                }
            }
        }
        FrameKind::Reply => {
            let reply = {
                let mut pending = shared
                    .pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                pending.remove(&frame.correlation)
            };
            match reply {
                Some(reply) => reply(frame.payload),
                None => warn!(
                    correlation = frame.correlation,
                    "reply with no matching request"
                ),
            }
        }
    }
}

impl Messenger for StreamMessenger {
    fn send(&self, channel: &str, message: Option<Bytes>) {
        if let Err(err) = self
            .shared
            .write_frame(&Frame::message(channel, message))
        {
            warn!(channel, error = %err, "failed to send message");
        }
    }

    fn send_with_reply(&self, channel: &str, message: Option<Bytes>, on_reply: BinaryReply) {
        let correlation = self.shared.next_correlation.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.insert(correlation, on_reply);
        }

        if let Err(err) = self
            .shared
            .write_frame(&Frame::request(correlation, channel, message))
        {
            warn!(channel, error = %err, "failed to send request, completing reply empty");
            let reply = {
                let mut pending = self
                    .shared
                    .pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                pending.remove(&correlation)
            };
            if let Some(reply) = reply {
                reply(None);
            }
        }
    }

    fn set_handler(&self, channel: &str, handler: Option<BinaryHandler>) {
        let mut handlers = self
            .shared
            .handlers
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

impl std::fmt::Debug for StreamMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMessenger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn messenger_pair() -> (StreamMessenger, StreamMessenger) {
        let (a, b) = UnixStream::pair().unwrap();
        let a_read = a.try_clone().unwrap();
        let b_read = b.try_clone().unwrap();
        (
            StreamMessenger::new(a_read, a),
            StreamMessenger::new(b_read, b),
        )
    }

    #[test]
    fn request_reply_roundtrip() {
        let (left, right) = messenger_pair();

        right.set_handler(
            "echo",
            Some(Arc::new(|message, reply| {
                reply.send(message);
            })),
        );

        let (tx, rx) = mpsc::channel();
        left.send_with_reply(
            "echo",
            Some(Bytes::from_static(b"ping")),
            Box::new(move |reply| {
                tx.send(reply).unwrap();
            }),
        );

        let reply = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply, Some(Bytes::from_static(b"ping")));
    }

    #[test]
    fn fire_and_forget_delivery_in_order() {
        let (left, right) = messenger_pair();
        let (tx, rx) = mpsc::channel();

        right.set_handler(
            "events",
            Some(Arc::new(move |message, _reply| {
                tx.send(message).unwrap();
            })),
        );

        for i in 0..16u8 {
            left.send("events", Some(Bytes::copy_from_slice(&[i])));
        }
        left.send("events", None);

        for i in 0..16u8 {
            let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(got, Some(Bytes::copy_from_slice(&[i])));
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
    }

    #[test]
    fn unhandled_request_replies_empty() {
        let (left, _right) = messenger_pair();

        let (tx, rx) = mpsc::channel();
        left.send_with_reply(
            "nobody-home",
            Some(Bytes::from_static(b"?")),
            Box::new(move |reply| {
                tx.send(reply).unwrap();
            }),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
    }

    #[test]
    fn absent_payload_survives_the_wire() {
        let (left, right) = messenger_pair();
        let (tx, rx) = mpsc::channel();

        right.set_handler(
            "null-check",
            Some(Arc::new(|message, reply| {
                assert_eq!(message, None);
                reply.send(None);
            })),
        );

        left.send_with_reply(
            "null-check",
            None,
            Box::new(move |reply| {
                tx.send(reply).unwrap();
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
    }

    #[test]
    fn deferred_reply_from_another_thread() {
        let (left, right) = messenger_pair();

        right.set_handler(
            "slow",
            Some(Arc::new(|_message, reply| {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    reply.send(Some(Bytes::from_static(b"late")));
                });
            })),
        );

        let (tx, rx) = mpsc::channel();
        left.send_with_reply(
            "slow",
            None,
            Box::new(move |reply| {
                tx.send(reply).unwrap();
            }),
        );

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(Bytes::from_static(b"late"))
        );
    }

    #[test]
    fn peer_close_completes_pending_replies() {
        let (local_sock, peer_sock) = UnixStream::pair().unwrap();
        let local_read = local_sock.try_clone().unwrap();
        let messenger = StreamMessenger::new(local_read, local_sock);

        let (tx, rx) = mpsc::channel();
        messenger.send_with_reply(
            "void",
            Some(Bytes::from_static(b"anyone?")),
            Box::new(move |reply| {
                tx.send(reply).unwrap();
            }),
        );

        // The peer reads the request but never answers, then hangs up.
        {
            let mut reader = FrameReader::new(peer_sock.try_clone().unwrap());
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.kind, FrameKind::Request);
        }
        drop(peer_sock);

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
    }

    #[test]
    fn unmatched_reply_is_ignored() {
        let (local_sock, peer_sock) = UnixStream::pair().unwrap();
        let local_read = local_sock.try_clone().unwrap();
        let messenger = StreamMessenger::new(local_read, local_sock);

        // Inject a reply that correlates to nothing.
        let mut peer_writer = FrameWriter::new(peer_sock);
        peer_writer
            .write_frame(&Frame::reply(999, Some(Bytes::from_static(b"ghost"))))
            .unwrap();

        // The messenger must still be functional afterwards.
        let (tx, rx) = mpsc::channel();
        messenger.set_handler(
            "probe",
            Some(Arc::new(move |_message, reply| {
                reply.send(None);
                let _ = tx.send(());
            })),
        );

        let mut probe_writer = FrameWriter::new(peer_writer.into_inner());
        probe_writer
            .write_frame(&Frame::message("probe", None))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
