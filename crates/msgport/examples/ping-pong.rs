//! Ping-pong example — method calls between two framed stream peers.
//!
//! Run with:
//!   cargo run --example ping-pong

use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::sync::Arc;

use msgport::channel::{CallResult, MethodChannel};
use msgport::codec::{CallError, StandardMethodCodec, Value};
use msgport::transport::StreamMessenger;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (host_stream, guest_stream) = UnixStream::pair()?;
    let host = StreamMessenger::new(host_stream.try_clone()?, host_stream);
    let guest = StreamMessenger::new(guest_stream.try_clone()?, guest_stream);

    // The guest answers pings and rejects everything else.
    let pong = MethodChannel::new(Arc::new(guest), "game", StandardMethodCodec);
    pong.set_method_call_handler(Some(Arc::new(|call, responder| {
        match call.method.as_str() {
            "ping" => {
                let Value::I64(round) = call.arguments else {
                    return Err(CallError::new("args", "expected a round number", Value::Null));
                };
                eprintln!("[guest] ping round {round}");
                responder.success(Value::I64(round + 1));
            }
            _ => responder.not_implemented(),
        }
        Ok(())
    })));

    let ping = MethodChannel::new(Arc::new(host), "game", StandardMethodCodec);
    let mut round = 0i64;
    for _ in 0..3 {
        let (tx, rx) = mpsc::channel();
        ping.invoke_with_reply("ping", Value::I64(round), move |result| {
            let _ = tx.send(result);
        })?;
        match rx.recv()? {
            CallResult::Success(Value::I64(next)) => {
                eprintln!("[host] pong, next round {next}");
                round = next;
            }
            other => {
                eprintln!("[host] unexpected result: {other:?}");
                break;
            }
        }
    }

    // An unknown method gets the distinguished not-implemented reply.
    let (tx, rx) = mpsc::channel();
    ping.invoke_with_reply("serve", Value::Null, move |result| {
        let _ = tx.send(result);
    })?;
    eprintln!("[host] serve: {:?}", rx.recv()?);

    Ok(())
}
