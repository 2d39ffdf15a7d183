//! Event channel: a remote-controlled event stream over a messenger.
//!
//! The remote side starts a stream with a `listen` method call and stops it
//! with `cancel`. Between those, the handler pushes events through an
//! [`EventSink`]. Each successful `listen` invalidates any sink handed out
//! before it, so a handler that keeps streaming past a cancel or re-listen
//! sends into the void rather than corrupting the new stream.

use std::sync::{Arc, Mutex, Weak};

use msgport_codec::{CallError, MethodCall, MethodCodec, Value};
use tracing::{debug, error, warn};

use msgport_transport::{Messenger, ReplySender};

/// Stream lifecycle callbacks for an [`EventChannel`].
///
/// `on_listen` receives the sink for the new stream; the handler may emit
/// events synchronously, stash the sink for later, or hand it to another
/// thread. Returning `Err` from either callback reports the failure to the
/// remote as an error envelope.
pub trait StreamHandler: Send + Sync {
    fn on_listen(&self, arguments: Value, events: EventSink) -> Result<(), CallError>;
    fn on_cancel(&self, arguments: Value) -> Result<(), CallError>;
}

/// Identity of the currently active stream, if any.
type ActiveSlot = Arc<Mutex<Option<Arc<SinkCore>>>>;

struct SinkCore {
    messenger: Arc<dyn Messenger>,
    channel: String,
    codec: Arc<dyn MethodCodec>,
    // Weak: the slot owns the sink, never the other way around.
    slot: Weak<Mutex<Option<Arc<SinkCore>>>>,
}

impl SinkCore {
    /// Whether this sink still identifies the active stream.
    fn is_active(self: &Arc<Self>) -> bool {
        let Some(slot) = self.slot.upgrade() else {
            return false;
        };
        let guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().is_some_and(|active| Arc::ptr_eq(active, self))
    }
}

/// Event outlet for the active stream on an [`EventChannel`].
///
/// Cloneable and sendable across threads. Once the stream is cancelled,
/// ended, or superseded by a new `listen`, every send on the old sink
/// becomes a silent no-op.
#[derive(Clone)]
pub struct EventSink {
    core: Arc<SinkCore>,
}

impl EventSink {
    /// Emit a success event.
    pub fn success(&self, event: Value) {
        if !self.core.is_active() {
            debug!(channel = %self.core.channel, "dropping event for inactive stream");
            return;
        }
        match self.core.codec.encode_success_envelope(&event) {
            Ok(bytes) => self.core.messenger.send(&self.core.channel, Some(bytes)),
            Err(err) => {
                error!(channel = %self.core.channel, error = %err, "failed to encode event");
            }
        }
    }

    /// Emit an error event. The stream stays open.
    pub fn error(&self, error: CallError) {
        if !self.core.is_active() {
            debug!(channel = %self.core.channel, "dropping error for inactive stream");
            return;
        }
        match self.core.codec.encode_error_envelope(&error) {
            Ok(bytes) => self.core.messenger.send(&self.core.channel, Some(bytes)),
            Err(err) => {
                error!(channel = %self.core.channel, error = %err, "failed to encode event error");
            }
        }
    }

    /// Close the stream from the producing side.
    ///
    /// Sends the distinguished end-of-stream message and deactivates this
    /// sink; later sends are silent no-ops.
    pub fn end_of_stream(&self) {
        let Some(slot) = self.core.slot.upgrade() else {
            return;
        };
        {
            let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.as_ref() {
                Some(active) if Arc::ptr_eq(active, &self.core) => *guard = None,
                _ => return,
            }
        }
        self.core.messenger.send(&self.core.channel, None);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("channel", &self.core.channel)
            .finish_non_exhaustive()
    }
}

/// A named event-stream channel.
pub struct EventChannel {
    messenger: Arc<dyn Messenger>,
    name: String,
    codec: Arc<dyn MethodCodec>,
}

impl EventChannel {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        name: impl Into<String>,
        codec: impl MethodCodec,
    ) -> Self {
        Self {
            messenger,
            name: name.into(),
            codec: Arc::new(codec),
        }
    }

    /// The channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install or remove the stream handler.
    ///
    /// Installing replaces any previous handler and abandons its active
    /// stream identity, if one existed.
    pub fn set_stream_handler(&self, handler: Option<Arc<dyn StreamHandler>>) {
        let Some(handler) = handler else {
            self.messenger.set_handler(&self.name, None);
            return;
        };

        let messenger = Arc::clone(&self.messenger);
        let codec = Arc::clone(&self.codec);
        let channel = self.name.clone();
        let slot: ActiveSlot = Arc::new(Mutex::new(None));

        self.messenger.set_handler(
            &self.name,
            Some(Arc::new(move |message, reply| {
                let call = match message.as_deref() {
                    Some(bytes) => match codec.decode_method_call(bytes) {
                        Ok(call) => call,
                        Err(err) => {
                            error!(channel = %channel, error = %err, "failed to decode stream control call");
                            let fault = CallError::new("decode", err.to_string(), Value::Null);
                            send_error(&*codec, &channel, reply, &fault);
                            return;
                        }
                    },
                    None => {
                        warn!(channel = %channel, "empty stream control message");
                        reply.send(None);
                        return;
                    }
                };

                match call.method.as_str() {
                    "listen" => on_listen(
                        &messenger, &codec, &channel, &slot, &*handler, call, reply,
                    ),
                    "cancel" => on_cancel(&codec, &channel, &slot, &*handler, call, reply),
                    other => {
                        debug!(channel = %channel, method = other, "unknown stream control method");
                        reply.send(None);
                    }
                }
            })),
        );
    }
}

fn on_listen(
    messenger: &Arc<dyn Messenger>,
    codec: &Arc<dyn MethodCodec>,
    channel: &str,
    slot: &ActiveSlot,
    handler: &dyn StreamHandler,
    call: MethodCall,
    reply: ReplySender,
) {
    let core = Arc::new(SinkCore {
        messenger: Arc::clone(messenger),
        channel: channel.to_string(),
        codec: Arc::clone(codec),
        slot: Arc::downgrade(slot),
    });

    {
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() {
            drop(guard);
            warn!(channel = %channel, "listen on an already active stream");
            let fault = CallError::new("error", "Stream already active", Value::Null);
            send_error(&**codec, channel, reply, &fault);
            return;
        }
        *guard = Some(Arc::clone(&core));
    }

    // Handler runs with the slot lock released; it may emit events or even
    // end the stream before we acknowledge the listen.
    let sink = EventSink { core: Arc::clone(&core) };
    match handler.on_listen(call.arguments, sink) {
        Ok(()) => match codec.encode_success_envelope(&Value::Null) {
            Ok(bytes) => reply.send(Some(bytes)),
            Err(err) => {
                error!(channel = %channel, error = %err, "failed to encode listen ack");
                reply.send(None);
            }
        },
        Err(err) => {
            warn!(channel = %channel, error = %err, "stream handler refused to listen");
            let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.as_ref().is_some_and(|active| Arc::ptr_eq(active, &core)) {
                *guard = None;
            }
            drop(guard);
            send_error(&**codec, channel, reply, &err);
        }
    }
}

fn on_cancel(
    codec: &Arc<dyn MethodCodec>,
    channel: &str,
    slot: &ActiveSlot,
    handler: &dyn StreamHandler,
    call: MethodCall,
    reply: ReplySender,
) {
    let had_active = slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
        .is_some();
    if !had_active {
        let fault = CallError::new("error", "No active stream to cancel", Value::Null);
        send_error(&**codec, channel, reply, &fault);
        return;
    }

    match handler.on_cancel(call.arguments) {
        Ok(()) => match codec.encode_success_envelope(&Value::Null) {
            Ok(bytes) => reply.send(Some(bytes)),
            Err(err) => {
                error!(channel = %channel, error = %err, "failed to encode cancel ack");
                reply.send(None);
            }
        },
        Err(err) => {
            warn!(channel = %channel, error = %err, "stream handler failed to cancel");
            send_error(&**codec, channel, reply, &err);
        }
    }
}

fn send_error(codec: &dyn MethodCodec, channel: &str, sender: ReplySender, error: &CallError) {
    match codec.encode_error_envelope(error) {
        Ok(bytes) => sender.send(Some(bytes)),
        Err(err) => {
            error!(channel = %channel, error = %err, "failed to encode error envelope");
            sender.send(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use msgport_codec::{MethodOutcome, StandardMethodCodec};
    use msgport_transport::LocalMessenger;

    use super::*;

    /// Captures everything the remote side of the channel sees.
    struct RemoteEnd {
        channel: MethodCallProxy,
        events: Arc<Mutex<Vec<Option<MethodOutcome>>>>,
    }

    /// Drives the stream protocol from the listening side, the way a remote
    /// peer would: control calls go out as method calls, events arrive as
    /// plain channel messages.
    struct MethodCallProxy {
        messenger: Arc<LocalMessenger>,
        name: String,
    }

    impl MethodCallProxy {
        fn call(&self, method: &str, arguments: Value) -> Option<MethodOutcome> {
            let codec = StandardMethodCodec;
            let bytes = codec
                .encode_method_call(&MethodCall::new(method, arguments))
                .unwrap();
            let got = Arc::new(Mutex::new(None));
            let got_clone = Arc::clone(&got);
            self.messenger.send_with_reply(
                &self.name,
                Some(bytes),
                Box::new(move |reply| {
                    *got_clone.lock().unwrap() =
                        Some(reply.map(|bytes| codec.decode_envelope(&bytes).unwrap()));
                }),
            );
            let reply = got.lock().unwrap().take();
            reply.expect("control call was not answered")
        }
    }

    fn remote_end(messenger: Arc<LocalMessenger>, name: &str) -> RemoteEnd {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        messenger.set_handler(
            name,
            Some(Arc::new(move |message, reply| {
                let decoded = message
                    .as_deref()
                    .map(|bytes| StandardMethodCodec.decode_envelope(bytes).unwrap());
                events_clone.lock().unwrap().push(decoded);
                reply.send(None);
            })),
        );
        RemoteEnd {
            channel: MethodCallProxy {
                messenger,
                name: name.to_string(),
            },
            events,
        }
    }

    struct RecordingHandler {
        listens: AtomicUsize,
        cancels: AtomicUsize,
        sink: Mutex<Option<EventSink>>,
        listen_result: fn() -> Result<(), CallError>,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                listens: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                sink: Mutex::new(None),
                listen_result: || Ok(()),
            })
        }
    }

    impl StreamHandler for RecordingHandler {
        fn on_listen(&self, _arguments: Value, events: EventSink) -> Result<(), CallError> {
            self.listens.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some(events);
            (self.listen_result)()
        }

        fn on_cancel(&self, _arguments: Value) -> Result<(), CallError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(name: &str) -> (RemoteEnd, Arc<RecordingHandler>, EventChannel) {
        let (left, right) = LocalMessenger::pair();
        let channel = EventChannel::new(Arc::new(right), name, StandardMethodCodec);
        let handler = RecordingHandler::new();
        channel.set_stream_handler(Some(handler.clone()));
        (remote_end(Arc::new(left), name), handler, channel)
    }

    fn success_value(outcome: &Option<MethodOutcome>) -> &Value {
        match outcome {
            Some(MethodOutcome::Success(value)) => value,
            other => panic!("expected success event, got {other:?}"),
        }
    }

    #[test]
    fn listen_emit_cancel() {
        let (remote, handler, _channel) = setup("ticks");

        let ack = remote.channel.call("listen", Value::Null);
        assert_eq!(ack, Some(MethodOutcome::Success(Value::Null)));
        assert_eq!(handler.listens.load(Ordering::SeqCst), 1);

        let sink = handler.sink.lock().unwrap().clone().unwrap();
        sink.success(Value::I64(1));
        sink.success(Value::I64(2));
        sink.error(CallError::new("lag", "fell behind", Value::Null));

        let ack = remote.channel.call("cancel", Value::Null);
        assert_eq!(ack, Some(MethodOutcome::Success(Value::Null)));
        assert_eq!(handler.cancels.load(Ordering::SeqCst), 1);

        let events = remote.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(success_value(&events[0]), &Value::I64(1));
        assert_eq!(success_value(&events[1]), &Value::I64(2));
        assert!(matches!(
            &events[2],
            Some(MethodOutcome::Error(err)) if err.code == "lag"
        ));
    }

    #[test]
    fn second_listen_is_rejected() {
        let (remote, handler, _channel) = setup("busy");

        remote.channel.call("listen", Value::Null);
        let second = remote.channel.call("listen", Value::Null);
        match second {
            Some(MethodOutcome::Error(err)) => {
                assert_eq!(err.code, "error");
                assert_eq!(err.message, "Stream already active");
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
        assert_eq!(handler.listens.load(Ordering::SeqCst), 1);

        // First stream is still live.
        let sink = handler.sink.lock().unwrap().clone().unwrap();
        sink.success(Value::Bool(true));
        assert_eq!(remote.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancel_without_stream_is_rejected() {
        let (remote, handler, _channel) = setup("idle");

        let ack = remote.channel.call("cancel", Value::Null);
        match ack {
            Some(MethodOutcome::Error(err)) => {
                assert_eq!(err.message, "No active stream to cancel");
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
        assert_eq!(handler.cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_sink_is_silenced() {
        let (remote, handler, _channel) = setup("restart");

        remote.channel.call("listen", Value::Null);
        let stale = handler.sink.lock().unwrap().clone().unwrap();
        remote.channel.call("cancel", Value::Null);
        remote.channel.call("listen", Value::Null);
        let fresh = handler.sink.lock().unwrap().clone().unwrap();

        stale.success(Value::String("stale".to_string()));
        stale.error(CallError::new("stale", "stale", Value::Null));
        stale.end_of_stream();
        fresh.success(Value::String("fresh".to_string()));

        let events = remote.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            success_value(&events[0]),
            &Value::String("fresh".to_string())
        );
    }

    #[test]
    fn end_of_stream_sends_empty_message() {
        let (remote, handler, _channel) = setup("finite");

        remote.channel.call("listen", Value::Null);
        let sink = handler.sink.lock().unwrap().clone().unwrap();
        sink.success(Value::I64(9));
        sink.end_of_stream();
        // The stream is closed now, so later events vanish.
        sink.success(Value::I64(10));

        let events = remote.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(success_value(&events[0]), &Value::I64(9));
        assert!(events[1].is_none());
    }

    #[test]
    fn listen_after_end_of_stream_starts_fresh() {
        let (remote, handler, _channel) = setup("rerun");

        remote.channel.call("listen", Value::Null);
        handler.sink.lock().unwrap().clone().unwrap().end_of_stream();

        let ack = remote.channel.call("listen", Value::Null);
        assert_eq!(ack, Some(MethodOutcome::Success(Value::Null)));
        assert_eq!(handler.listens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_method_is_unanswered() {
        let (remote, _handler, _channel) = setup("strict");
        assert_eq!(remote.channel.call("pause", Value::Null), None);
    }

    #[test]
    fn failed_listen_leaves_no_active_stream() {
        let (left, right) = LocalMessenger::pair();
        let channel = EventChannel::new(Arc::new(right), "refuses", StandardMethodCodec);
        let handler = Arc::new(RecordingHandler {
            listens: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            sink: Mutex::new(None),
            listen_result: || Err(CallError::new("denied", "not now", Value::Null)),
        });
        channel.set_stream_handler(Some(handler.clone()));
        let remote = remote_end(Arc::new(left), "refuses");

        let ack = remote.channel.call("listen", Value::Null);
        assert!(matches!(
            ack,
            Some(MethodOutcome::Error(err)) if err.code == "denied"
        ));

        // The failed listen did not occupy the slot.
        let ack = remote.channel.call("cancel", Value::Null);
        assert!(matches!(
            ack,
            Some(MethodOutcome::Error(err)) if err.message == "No active stream to cancel"
        ));
    }
}
