//! JSON text codecs.
//!
//! Values are mapped onto a `serde_json` tree and serialized as UTF-8
//! text. The JSON value domain is narrower than [`Value`]: typed numeric
//! arrays flatten to plain arrays, integers carry no width (every integer
//! decodes as `I64`, or `BigInt` past the `i64` range), and non-finite
//! floats have no representation at all.

use bytes::Bytes;
use serde_json::{json, Number};

use crate::error::{CodecError, Result};
use crate::message::MessageCodec;
use crate::method::{CallError, MethodCall, MethodCodec, MethodOutcome};
use crate::value::Value;

fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::I32(v) => serde_json::Value::Number((*v).into()),
        Value::I64(v) => serde_json::Value::Number((*v).into()),
        Value::BigInt(digits) => {
            // JSON numbers top out at u64 here; wider integers cannot be
            // written without silently corrupting them.
            if let Ok(v) = digits.parse::<i64>() {
                serde_json::Value::Number(v.into())
            } else if let Ok(v) = digits.parse::<u64>() {
                serde_json::Value::Number(v.into())
            } else {
                return Err(CodecError::Unrepresentable("integer beyond u64 in JSON"));
            }
        }
        Value::F64(v) => serde_json::Value::Number(
            Number::from_f64(*v).ok_or(CodecError::Unrepresentable("non-finite float in JSON"))?,
        ),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::ByteList(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|b| serde_json::Value::Number((*b).into()))
                .collect(),
        ),
        Value::I32List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| serde_json::Value::Number((*v).into()))
                .collect(),
        ),
        Value::I64List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| serde_json::Value::Number((*v).into()))
                .collect(),
        ),
        Value::F64List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(serde_json::Value::Number(Number::from_f64(*v).ok_or(
                    CodecError::Unrepresentable("non-finite float in JSON"),
                )?));
            }
            serde_json::Value::Array(out)
        }
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_to_json(item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Map(entries) => {
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (key, val) in entries {
                out.insert(key.clone(), value_to_json(val)?);
            }
            serde_json::Value::Object(out)
        }
    })
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::I64(v)
            } else if n.as_u64().is_some() {
                Value::BigInt(n.to_string())
            } else {
                // serde_json guarantees finite numbers only.
                Value::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(key, val)| (key.clone(), json_to_value(val)))
                .collect(),
        ),
    }
}

fn to_bytes(json: &serde_json::Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(json)?))
}

/// JSON message codec over [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    type Message = Value;

    fn encode_message(&self, message: Option<&Value>) -> Result<Option<Bytes>> {
        match message {
            None => Ok(None),
            Some(value) => Ok(Some(to_bytes(&value_to_json(value)?)?)),
        }
    }

    fn decode_message(&self, message: Option<&[u8]>) -> Result<Option<Value>> {
        match message {
            None => Ok(None),
            Some(bytes) => {
                let json: serde_json::Value = serde_json::from_slice(bytes)?;
                Ok(Some(json_to_value(&json)))
            }
        }
    }
}

/// JSON method codec.
///
/// A method call is `{"method": <string>, "args": <value>}`; a success
/// envelope is the one-element array `[<result>]`; an error envelope is
/// `[<code>, <message>, <details>]` with an optional fourth stack-trace
/// string.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMethodCodec;

impl JsonMethodCodec {
    fn decode_error_fields(&self, fields: &[serde_json::Value]) -> Result<CallError> {
        let code = match &fields[0] {
            serde_json::Value::String(code) => code.clone(),
            _ => return Err(CodecError::CorruptedEnvelope("error code must be a string")),
        };
        let message = match &fields[1] {
            serde_json::Value::String(message) => message.clone(),
            serde_json::Value::Null => String::new(),
            _ => {
                return Err(CodecError::CorruptedEnvelope(
                    "error message must be a string or null",
                ))
            }
        };
        if fields.len() == 4 && !(fields[3].is_string() || fields[3].is_null()) {
            return Err(CodecError::CorruptedEnvelope("stack trace must be a string"));
        }
        Ok(CallError {
            code,
            message,
            details: json_to_value(&fields[2]),
        })
    }
}

impl MethodCodec for JsonMethodCodec {
    fn encode_method_call(&self, call: &MethodCall) -> Result<Bytes> {
        to_bytes(&json!({
            "method": call.method,
            "args": value_to_json(&call.arguments)?,
        }))
    }

    fn decode_method_call(&self, bytes: &[u8]) -> Result<MethodCall> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        let obj = json.as_object().ok_or(CodecError::CorruptedCall)?;
        let method = match obj.get("method") {
            Some(serde_json::Value::String(method)) => method.clone(),
            _ => return Err(CodecError::CorruptedCall),
        };
        let arguments = obj.get("args").map(json_to_value).unwrap_or(Value::Null);
        Ok(MethodCall { method, arguments })
    }

    fn encode_success_envelope(&self, result: &Value) -> Result<Bytes> {
        to_bytes(&serde_json::Value::Array(vec![value_to_json(result)?]))
    }

    fn encode_error_envelope(&self, error: &CallError) -> Result<Bytes> {
        to_bytes(&json!([
            error.code,
            error.message,
            value_to_json(&error.details)?,
        ]))
    }

    fn encode_error_envelope_with_stacktrace(
        &self,
        error: &CallError,
        stacktrace: &str,
    ) -> Result<Bytes> {
        to_bytes(&json!([
            error.code,
            error.message,
            value_to_json(&error.details)?,
            stacktrace,
        ]))
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<MethodOutcome> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        let fields = json
            .as_array()
            .ok_or(CodecError::CorruptedEnvelope("envelope must be an array"))?;
        match fields.len() {
            1 => Ok(MethodOutcome::Success(json_to_value(&fields[0]))),
            3 | 4 => Ok(MethodOutcome::Error(self.decode_error_fields(fields)?)),
            _ => Err(CodecError::CorruptedEnvelope("unexpected envelope length")),
        }
    }
}
