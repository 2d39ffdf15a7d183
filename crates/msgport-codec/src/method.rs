//! Method-call framing and success/error reply envelopes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::standard::{write_value, ValueReader};
use crate::value::Value;

/// Envelope discriminator: success reply.
const ENVELOPE_SUCCESS: u8 = 0;
/// Envelope discriminator: error reply.
const ENVELOPE_ERROR: u8 = 1;

/// A named method invocation with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// A structured call failure: opaque code, human-readable message, and an
/// arbitrary details value. Built locally by handlers or decoded from a
/// remote error envelope.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CallError {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl CallError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

/// Decoded outcome carried by a reply envelope.
///
/// This is the explicit two-way branch a caller takes after `decode_envelope`;
/// the third branch (not implemented) is signalled by the absence of a reply
/// buffer and never reaches the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutcome {
    Success(Value),
    Error(CallError),
}

/// Codec for method calls and their reply envelopes, built on a value codec.
pub trait MethodCodec: Send + Sync + 'static {
    /// Encode a method call into a buffer.
    fn encode_method_call(&self, call: &MethodCall) -> Result<Bytes>;

    /// Decode a method call.
    ///
    /// Fails with [`CodecError::CorruptedCall`] if the method name is not a
    /// string, and with the usual decode faults on malformed or trailing
    /// bytes.
    fn decode_method_call(&self, bytes: &[u8]) -> Result<MethodCall>;

    /// Encode a success envelope around `result`.
    fn encode_success_envelope(&self, result: &Value) -> Result<Bytes>;

    /// Encode an error envelope.
    fn encode_error_envelope(&self, error: &CallError) -> Result<Bytes>;

    /// Encode an error envelope carrying an additional stack-trace string.
    fn encode_error_envelope_with_stacktrace(
        &self,
        error: &CallError,
        stacktrace: &str,
    ) -> Result<Bytes>;

    /// Decode a reply envelope into its outcome.
    fn decode_envelope(&self, bytes: &[u8]) -> Result<MethodOutcome>;
}

/// Method codec over the tagged binary format.
///
/// A method call is the concatenation of the encoded method-name string and
/// the encoded arguments value. An envelope is a discriminator byte (`0`
/// success, `1` error) followed by the payload values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMethodCodec;

impl StandardMethodCodec {
    fn encode_error(&self, error: &CallError, stacktrace: Option<&str>) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(ENVELOPE_ERROR);
        write_value(&mut buf, &Value::String(error.code.clone()));
        write_value(&mut buf, &Value::String(error.message.clone()));
        write_value(&mut buf, &error.details);
        if let Some(trace) = stacktrace {
            write_value(&mut buf, &Value::String(trace.to_string()));
        }
        buf.freeze()
    }
}

impl MethodCodec for StandardMethodCodec {
    fn encode_method_call(&self, call: &MethodCall) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &Value::String(call.method.clone()));
        write_value(&mut buf, &call.arguments);
        Ok(buf.freeze())
    }

    fn decode_method_call(&self, bytes: &[u8]) -> Result<MethodCall> {
        let mut reader = ValueReader::new(bytes);
        let method = match reader.read_value()? {
            Value::String(method) => method,
            _ => return Err(CodecError::CorruptedCall),
        };
        let arguments = reader.read_value()?;
        reader.expect_done()?;
        Ok(MethodCall { method, arguments })
    }

    fn encode_success_envelope(&self, result: &Value) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u8(ENVELOPE_SUCCESS);
        write_value(&mut buf, result);
        Ok(buf.freeze())
    }

    fn encode_error_envelope(&self, error: &CallError) -> Result<Bytes> {
        Ok(self.encode_error(error, None))
    }

    fn encode_error_envelope_with_stacktrace(
        &self,
        error: &CallError,
        stacktrace: &str,
    ) -> Result<Bytes> {
        Ok(self.encode_error(error, Some(stacktrace)))
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<MethodOutcome> {
        let mut reader = ValueReader::new(bytes);
        match reader.read_u8() {
            Ok(ENVELOPE_SUCCESS) => {
                let result = reader.read_value()?;
                reader.expect_done()?;
                Ok(MethodOutcome::Success(result))
            }
            Ok(ENVELOPE_ERROR) => {
                let code = match reader.read_value()? {
                    Value::String(code) => code,
                    _ => return Err(CodecError::CorruptedEnvelope("error code must be a string")),
                };
                let message = match reader.read_value()? {
                    Value::String(message) => message,
                    Value::Null => String::new(),
                    _ => {
                        return Err(CodecError::CorruptedEnvelope(
                            "error message must be a string or null",
                        ))
                    }
                };
                let details = reader.read_value()?;
                // Tolerate the four-field form; the trailing stack trace is
                // informational only.
                if reader.remaining() > 0 {
                    match reader.read_value()? {
                        Value::String(_) | Value::Null => {}
                        _ => {
                            return Err(CodecError::CorruptedEnvelope(
                                "stack trace must be a string",
                            ))
                        }
                    }
                }
                reader.expect_done()?;
                Ok(MethodOutcome::Error(CallError {
                    code,
                    message,
                    details,
                }))
            }
            Ok(_) => Err(CodecError::CorruptedEnvelope("unknown discriminator")),
            Err(_) => Err(CodecError::CorruptedEnvelope("empty envelope")),
        }
    }
}
