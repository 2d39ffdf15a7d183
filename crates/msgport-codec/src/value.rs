//! The value domain shared by all structured codecs.

use bytes::Bytes;

/// A structured message value.
///
/// This is the closed set of shapes every structured codec can carry:
/// primitives, a few typed numeric arrays (kept distinct so codecs can lay
/// them out with zero-copy-friendly alignment), ordered lists, and
/// string-keyed maps. Maps preserve insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    /// An integer too wide for `i64`, carried as its textual digits.
    /// The digits are passed through opaquely; no arithmetic is done here.
    BigInt(String),
    F64(f64),
    String(String),
    ByteList(Vec<u8>),
    I32List(Vec<i32>),
    I64List(Vec<i64>),
    F64List(Vec<f64>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Short name of the value's shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::BigInt(_) => "bigint",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::ByteList(_) => "byte list",
            Value::I32List(_) => "i32 list",
            Value::I64List(_) => "i64 list",
            Value::F64List(_) => "f64 list",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns the contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::ByteList(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7i32), Value::I32(7));
        assert_eq!(Value::from(7i64), Value::I64(7));
        assert_eq!(Value::from("x"), Value::String("x".to_string()));
        assert_eq!(
            Value::from(vec![Value::Null]),
            Value::List(vec![Value::Null])
        );
    }

    #[test]
    fn default_is_null() {
        assert!(Value::default().is_null());
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::Map(vec![]).kind(), "map");
        assert_eq!(Value::I32List(vec![]).kind(), "i32 list");
    }
}
