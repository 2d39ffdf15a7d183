//! Event-stream example — a countdown stream over an in-process messenger.
//!
//! Run with:
//!   cargo run --example event-stream

use std::sync::Arc;

use msgport::channel::{EventChannel, EventSink, StreamHandler};
use msgport::codec::{
    CallError, MethodCall, MethodCodec, MethodOutcome, StandardMethodCodec, Value,
};
use msgport::transport::{LocalMessenger, Messenger};

/// Streams a countdown from the requested start, then closes the stream.
struct Countdown;

impl StreamHandler for Countdown {
    fn on_listen(&self, arguments: Value, events: EventSink) -> Result<(), CallError> {
        let Value::I64(start) = arguments else {
            return Err(CallError::new("args", "expected a starting count", Value::Null));
        };
        std::thread::spawn(move || {
            for n in (0..=start).rev() {
                events.success(Value::I64(n));
            }
            events.end_of_stream();
        });
        Ok(())
    }

    fn on_cancel(&self, _arguments: Value) -> Result<(), CallError> {
        eprintln!("[producer] stream cancelled");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (consumer, producer) = LocalMessenger::pair();
    let consumer = Arc::new(consumer);

    let channel = EventChannel::new(Arc::new(producer), "countdown", StandardMethodCodec);
    channel.set_stream_handler(Some(Arc::new(Countdown)));

    // Events arrive as plain messages on the channel name; the end of the
    // stream arrives as an empty message.
    let (tx, rx) = std::sync::mpsc::channel();
    consumer.set_handler(
        "countdown",
        Some(Arc::new(move |message, reply| {
            let event = message
                .as_deref()
                .map(|bytes| StandardMethodCodec.decode_envelope(bytes));
            let _ = tx.send(event);
            reply.send(None);
        })),
    );

    // Start the stream with a method call.
    let call = StandardMethodCodec.encode_method_call(&MethodCall::new("listen", Value::I64(3)))?;
    consumer.send_with_reply(
        "countdown",
        Some(call),
        Box::new(|reply| match reply {
            Some(_) => eprintln!("[consumer] stream started"),
            None => eprintln!("[consumer] producer refused to stream"),
        }),
    );

    loop {
        match rx.recv()? {
            Some(Ok(MethodOutcome::Success(value))) => eprintln!("[consumer] event: {value:?}"),
            Some(Ok(MethodOutcome::Error(err))) => eprintln!("[consumer] error event: {err}"),
            Some(Err(err)) => eprintln!("[consumer] undecodable event: {err}"),
            None => {
                eprintln!("[consumer] end of stream");
                break;
            }
        }
    }

    Ok(())
}
