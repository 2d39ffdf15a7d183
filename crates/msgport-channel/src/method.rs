//! Method channel: single request → single response RPC over a messenger.

use std::sync::{Arc, Mutex};

use msgport_codec::{CallError, CodecError, MethodCall, MethodCodec, MethodOutcome, Value};
use msgport_transport::{Messenger, ReplySender};
use tracing::{error, warn};

/// Outcome of an outbound method call, delivered to the caller's callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    /// The remote handler answered with a value.
    Success(Value),
    /// The remote handler answered with a structured failure.
    Error(CallError),
    /// No remote handler was registered, or it declined the call.
    NotImplemented,
}

/// Handler for inbound method calls.
///
/// The handler answers through the [`Responder`] — immediately or later
/// from another thread. Returning `Err` before a reply was sent answers
/// the caller with that error envelope, so no call is ever left without a
/// terminal reply.
pub type MethodCallHandler =
    Arc<dyn Fn(MethodCall, Responder) -> Result<(), CallError> + Send + Sync>;

/// A named RPC channel.
pub struct MethodChannel {
    messenger: Arc<dyn Messenger>,
    name: String,
    codec: Arc<dyn MethodCodec>,
}

impl MethodChannel {
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

    /// Invoke a remote method, ignoring the result.
    pub fn invoke(&self, method: &str, arguments: Value) -> Result<(), CodecError> {
        let bytes = self
            .codec
            .encode_method_call(&MethodCall::new(method, arguments))?;
        self.messenger.send(&self.name, Some(bytes));
        Ok(())
    }

    /// Invoke a remote method and receive its [`CallResult`].
    ///
    /// The callback fires exactly once when the reply arrives — there is no
    /// timeout, so a remote that never replies leaves it pending forever. A
    /// reply envelope that fails to decode is logged and dropped.
    pub fn invoke_with_reply<F>(
        &self,
        method: &str,
        arguments: Value,
        on_result: F,
    ) -> Result<(), CodecError>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let bytes = self
            .codec
            .encode_method_call(&MethodCall::new(method, arguments))?;
        let codec = Arc::clone(&self.codec);
        let channel = self.name.clone();
        self.messenger.send_with_reply(
            &self.name,
            Some(bytes),
            Box::new(move |reply| match reply {
                None => on_result(CallResult::NotImplemented),
                Some(bytes) => match codec.decode_envelope(&bytes) {
                    Ok(MethodOutcome::Success(value)) => on_result(CallResult::Success(value)),
                    Ok(MethodOutcome::Error(err)) => on_result(CallResult::Error(err)),
                    Err(err) => {
                        error!(channel = %channel, error = %err, "failed to decode reply envelope");
                    }
                },
            }),
        );
        Ok(())
    }

    /// Install or remove the inbound method-call handler.
    ///
    /// Installing replaces any previous handler for this channel name. The
    /// dispatcher guarantees every inbound call a terminal reply: decode
    /// failures answer with a `"decode"` error envelope, handler failures
    /// with the handler's own error.
    pub fn set_method_call_handler(&self, handler: Option<MethodCallHandler>) {
        let Some(handler) = handler else {
            self.messenger.set_handler(&self.name, None);
            return;
        };

        let codec = Arc::clone(&self.codec);
        let channel = self.name.clone();
        self.messenger.set_handler(
            &self.name,
            Some(Arc::new(move |message, reply| {
                let decoded = match message.as_deref() {
                    Some(bytes) => codec.decode_method_call(bytes),
                    None => Err(CodecError::CorruptedCall),
                };
                let call = match decoded {
                    Ok(call) => call,
                    Err(err) => {
                        error!(channel = %channel, error = %err, "failed to decode method call");
                        let fault =
                            CallError::new("decode", err.to_string(), Value::Null);
                        send_error(&*codec, &channel, reply, &fault);
                        return;
                    }
                };

                let responder = Responder {
                    core: Arc::new(ResponderCore {
                        channel: channel.clone(),
                        codec: Arc::clone(&codec),
                        slot: Mutex::new(Some(reply)),
                    }),
                };
                let watchdog = responder.clone();
                if let Err(err) = handler(call, responder) {
                    warn!(channel = %channel, error = %err, "method handler failed");
                    // Answer with the handler's error unless it already
                    // replied through the responder.
                    if let Some(sender) = watchdog.core.try_take() {
                        send_error(&*watchdog.core.codec, &watchdog.core.channel, sender, &err);
                    }
                }
            })),
        );
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

struct ResponderCore {
    channel: String,
    codec: Arc<dyn MethodCodec>,
    slot: Mutex<Option<ReplySender>>,
}

impl ResponderCore {
    fn try_take(&self) -> Option<ReplySender> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn take(&self) -> ReplySender {
        match self.try_take() {
            Some(sender) => sender,
            None => panic!("reply already submitted on channel {}", self.channel),
        }
    }
}

/// Single-use three-way result sink for an inbound method call.
///
/// Exactly one of [`success`](Responder::success),
/// [`error`](Responder::error) or
/// [`not_implemented`](Responder::not_implemented) must be called, at most
/// once; the responder may be moved into deferred work and completed from
/// any thread.
///
/// # Panics
///
/// Completing the responder a second time is a programming defect and
/// panics with "reply already submitted".
#[derive(Clone)]
pub struct Responder {
    core: Arc<ResponderCore>,
}

impl Responder {
    /// Answer the call with a result value.
    ///
    /// If the value cannot be encoded, the caller receives an `"encode"`
    /// error envelope instead.
    pub fn success(&self, result: Value) {
        let sender = self.core.take();
        match self.core.codec.encode_success_envelope(&result) {
            Ok(bytes) => sender.send(Some(bytes)),
            Err(err) => {
                error!(
                    channel = %self.core.channel,
                    error = %err,
                    "failed to encode success envelope"
                );
                let fault = CallError::new(
                    "encode",
                    format!("failed to encode reply: {err}"),
                    Value::Null,
                );
                send_error(&*self.core.codec, &self.core.channel, sender, &fault);
            }
        }
    }

    /// Answer the call with a structured error.
    pub fn error(&self, error: CallError) {
        let sender = self.core.take();
        send_error(&*self.core.codec, &self.core.channel, sender, &error);
    }

    /// Answer the call with the distinguished not-implemented reply.
    pub fn not_implemented(&self) {
        self.core.take().send(None);
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("channel", &self.core.channel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::sync::Mutex;

    use bytes::Bytes;
    use msgport_codec::StandardMethodCodec;
    use msgport_transport::LocalMessenger;

    use super::*;

    fn channel_pair(name: &str) -> (MethodChannel, MethodChannel, Arc<LocalMessenger>) {
        let (left, right) = LocalMessenger::pair();
        let left = Arc::new(left);
        (
            MethodChannel::new(left.clone(), name, StandardMethodCodec),
            MethodChannel::new(Arc::new(right), name, StandardMethodCodec),
            left,
        )
    }

    fn collect_result(
        caller: &MethodChannel,
        method: &str,
        arguments: Value,
    ) -> Arc<Mutex<Option<CallResult>>> {
        let got = Arc::new(Mutex::new(None));
        let got_clone = Arc::clone(&got);
        caller
            .invoke_with_reply(method, arguments, move |result| {
                *got_clone.lock().unwrap() = Some(result);
            })
            .unwrap();
        got
    }

    #[test]
    fn success_roundtrip() {
        let (caller, callee, _) = channel_pair("math");

        callee.set_method_call_handler(Some(Arc::new(|call, responder| {
            assert_eq!(call.method, "double");
            let Value::I64(n) = call.arguments else {
                responder.error(CallError::new("args", "expected an integer", Value::Null));
                return Ok(());
            };
            responder.success(Value::I64(n * 2));
            Ok(())
        })));

        let got = collect_result(&caller, "double", Value::I64(21));
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Success(Value::I64(42)))
        );
    }

    #[test]
    fn error_propagates_exactly() {
        let (caller, callee, _) = channel_pair("strict");

        callee.set_method_call_handler(Some(Arc::new(|_call, responder| {
            responder.error(CallError::new(
                "E1",
                "bad input",
                Value::Map(vec![("field".to_string(), Value::String("n".to_string()))]),
            ));
            Ok(())
        })));

        let got = collect_result(&caller, "validate", Value::Null);
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Error(CallError::new(
                "E1",
                "bad input",
                Value::Map(vec![("field".to_string(), Value::String("n".to_string()))]),
            )))
        );
    }

    #[test]
    fn missing_handler_is_not_implemented() {
        let (caller, _callee, _) = channel_pair("void");
        let got = collect_result(&caller, "anything", Value::Null);
        assert_eq!(got.lock().unwrap().take(), Some(CallResult::NotImplemented));
    }

    #[test]
    fn explicit_not_implemented() {
        let (caller, callee, _) = channel_pair("partial");

        callee.set_method_call_handler(Some(Arc::new(|call, responder| {
            match call.method.as_str() {
                "known" => responder.success(Value::Bool(true)),
                _ => responder.not_implemented(),
            }
            Ok(())
        })));

        let got = collect_result(&caller, "unknown", Value::Null);
        assert_eq!(got.lock().unwrap().take(), Some(CallResult::NotImplemented));

        let got = collect_result(&caller, "known", Value::Null);
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Success(Value::Bool(true)))
        );
    }

    #[test]
    fn second_reply_faults_first_reply_wins() {
        let (caller, callee, _) = channel_pair("eager");

        callee.set_method_call_handler(Some(Arc::new(|_call, responder| {
            responder.success(Value::I64(1));
            let second = std::panic::catch_unwind(AssertUnwindSafe(|| {
                responder.success(Value::I64(2));
            }));
            assert!(second.is_err());
            Ok(())
        })));

        let got = collect_result(&caller, "go", Value::Null);
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Success(Value::I64(1)))
        );
    }

    #[test]
    fn handler_error_becomes_error_envelope() {
        let (caller, callee, _) = channel_pair("faulty");

        callee.set_method_call_handler(Some(Arc::new(|_call, _responder| {
            Err(CallError::new("state", "not ready", Value::Null))
        })));

        let got = collect_result(&caller, "poke", Value::Null);
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Error(CallError::new(
                "state",
                "not ready",
                Value::Null
            )))
        );
    }

    #[test]
    fn handler_error_after_reply_keeps_reply() {
        let (caller, callee, _) = channel_pair("late-fault");

        callee.set_method_call_handler(Some(Arc::new(|_call, responder| {
            responder.success(Value::String("done".to_string()));
            Err(CallError::new("late", "failed after replying", Value::Null))
        })));

        let got = collect_result(&caller, "go", Value::Null);
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Success(Value::String("done".to_string())))
        );
    }

    #[test]
    fn undecodable_call_answers_decode_error() {
        let (_caller, callee, left_messenger) = channel_pair("garbled");

        callee.set_method_call_handler(Some(Arc::new(|_call, responder| {
            responder.success(Value::Null);
            Ok(())
        })));

        // Bypass the channel and send bytes that are not a method call.
        let got = Arc::new(Mutex::new(None));
        let got_clone = Arc::clone(&got);
        left_messenger.send_with_reply(
            "garbled",
            Some(Bytes::from_static(&[0xFF, 0xFF])),
            Box::new(move |reply| {
                *got_clone.lock().unwrap() = Some(reply);
            }),
        );

        let reply = got.lock().unwrap().take().unwrap().unwrap();
        let outcome = StandardMethodCodec.decode_envelope(&reply).unwrap();
        match outcome {
            MethodOutcome::Error(err) => assert_eq!(err.code, "decode"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn deferred_reply_from_moved_responder() {
        let (caller, callee, _) = channel_pair("later");
        let parked = Arc::new(Mutex::new(None::<Responder>));

        let parked_clone = Arc::clone(&parked);
        callee.set_method_call_handler(Some(Arc::new(move |_call, responder| {
            *parked_clone.lock().unwrap() = Some(responder);
            Ok(())
        })));

        let got = collect_result(&caller, "wait", Value::Null);
        assert!(got.lock().unwrap().is_none());

        let responder = parked.lock().unwrap().take().unwrap();
        responder.success(Value::I64(7));
        assert_eq!(
            got.lock().unwrap().take(),
            Some(CallResult::Success(Value::I64(7)))
        );
    }
}
