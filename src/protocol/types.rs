//! Primitive wire types for the binary protocol.
//!
//! Each `DataType` knows how to validate, size, encode and decode its
//! values. All multi-byte integers are big-endian (network byte order).
//! Encoding never coerces: a value that does not match its declared type
//! is a schema error, caught before any bytes are written.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Errors raised while validating, encoding or decoding typed values.
///
/// Negative-length and insufficient-data cases are distinct variants so
/// callers can tell a corrupt length prefix from a short read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("length {0} cannot be negative")]
    NegativeLength(i64),

    #[error("need {needed} bytes but only {remaining} available")]
    InsufficientData { needed: usize, remaining: usize },

    #[error("expected {expected} but value is {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("null is not valid for a non-nullable {0}")]
    NullNotAllowed(&'static str),

    #[error("string length {0} exceeds the 16-bit length prefix")]
    StringTooLong(usize),

    #[error("string bytes are not valid UTF-8")]
    InvalidUtf8,

    #[error("schema has no field named `{0}`")]
    UnknownField(String),

    #[error("field `{0}` was never set before encoding")]
    MissingField(&'static str),
}

/// A runtime value carried by a [`Struct`](super::schema::Struct) field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Str(String),
    Bytes(Bytes),
    /// `None` encodes as the -1 null sentinel (nullable arrays only).
    Array(Option<Vec<Value>>),
}

impl Value {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "BOOLEAN",
            Value::Int8(_) => "INT8",
            Value::Int16(_) => "INT16",
            Value::Int32(_) => "INT32",
            Value::Int64(_) => "INT64",
            Value::Str(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::Array(_) => "ARRAY",
        }
    }
}

/// Array element type plus nullability marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayOf {
    elem: Box<DataType>,
    nullable: bool,
}

impl ArrayOf {
    pub fn new(elem: DataType) -> Self {
        Self {
            elem: Box::new(elem),
            nullable: false,
        }
    }

    pub fn nullable(elem: DataType) -> Self {
        Self {
            elem: Box::new(elem),
            nullable: true,
        }
    }
}

/// Declared wire type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Str,
    Bytes,
    Array(ArrayOf),
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Str => "STRING",
            DataType::Bytes => "BYTES",
            DataType::Array(_) => "ARRAY",
        }
    }

    /// Check that `value` matches this type without encoding it.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let ok = match (self, value) {
            (DataType::Boolean, Value::Boolean(_)) => true,
            (DataType::Int8, Value::Int8(_)) => true,
            (DataType::Int16, Value::Int16(_)) => true,
            (DataType::Int32, Value::Int32(_)) => true,
            (DataType::Int64, Value::Int64(_)) => true,
            (DataType::Str, Value::Str(_)) => true,
            (DataType::Bytes, Value::Bytes(_)) => true,
            (DataType::Array(a), Value::Array(items)) => {
                match items {
                    None => {
                        if !a.nullable {
                            return Err(SchemaError::NullNotAllowed("ARRAY"));
                        }
                    }
                    Some(items) => {
                        for item in items {
                            a.elem.validate(item)?;
                        }
                    }
                }
                true
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(SchemaError::TypeMismatch {
                expected: self.name(),
                found: value.kind(),
            })
        }
    }

    /// Exact encoded size of `value` in bytes, without a dry-run encode.
    pub fn size_of(&self, value: &Value) -> Result<usize, SchemaError> {
        self.validate(value)?;
        Ok(match (self, value) {
            (DataType::Boolean, _) | (DataType::Int8, _) => 1,
            (DataType::Int16, _) => 2,
            (DataType::Int32, _) => 4,
            (DataType::Int64, _) => 8,
            (DataType::Str, Value::Str(s)) => 2 + s.len(),
            (DataType::Bytes, Value::Bytes(b)) => 4 + b.len(),
            (DataType::Array(_), Value::Array(None)) => 4,
            (DataType::Array(a), Value::Array(Some(items))) => {
                let mut total = 4;
                for item in items {
                    total += a.elem.size_of(item)?;
                }
                total
            }
            _ => unreachable!("validate accepted a mismatched value"),
        })
    }

    /// Encode `value` into `buf`. The caller sizes `buf` via [`size_of`].
    ///
    /// [`size_of`]: DataType::size_of
    pub fn write<B: BufMut>(&self, buf: &mut B, value: &Value) -> Result<(), SchemaError> {
        self.validate(value)?;
        match (self, value) {
            (DataType::Boolean, Value::Boolean(v)) => buf.put_u8(u8::from(*v)),
            (DataType::Int8, Value::Int8(v)) => buf.put_i8(*v),
            (DataType::Int16, Value::Int16(v)) => buf.put_i16(*v),
            (DataType::Int32, Value::Int32(v)) => buf.put_i32(*v),
            (DataType::Int64, Value::Int64(v)) => buf.put_i64(*v),
            (DataType::Str, Value::Str(s)) => {
                if s.len() > i16::MAX as usize {
                    return Err(SchemaError::StringTooLong(s.len()));
                }
                buf.put_i16(s.len() as i16);
                buf.put_slice(s.as_bytes());
            }
            (DataType::Bytes, Value::Bytes(b)) => {
                buf.put_i32(b.len() as i32);
                buf.put_slice(b);
            }
            (DataType::Array(_), Value::Array(None)) => buf.put_i32(-1),
            (DataType::Array(a), Value::Array(Some(items))) => {
                buf.put_i32(items.len() as i32);
                for item in items {
                    a.elem.write(buf, item)?;
                }
            }
            _ => unreachable!("validate accepted a mismatched value"),
        }
        Ok(())
    }

    /// Decode one value of this type from `buf`.
    pub fn read<B: Buf>(&self, buf: &mut B) -> Result<Value, SchemaError> {
        match self {
            DataType::Boolean => Ok(Value::Boolean(read_exact(buf, 1)?.get_u8() != 0)),
            DataType::Int8 => Ok(Value::Int8(read_exact(buf, 1)?.get_i8())),
            DataType::Int16 => Ok(Value::Int16(read_exact(buf, 2)?.get_i16())),
            DataType::Int32 => Ok(Value::Int32(read_exact(buf, 4)?.get_i32())),
            DataType::Int64 => Ok(Value::Int64(read_exact(buf, 8)?.get_i64())),
            DataType::Str => {
                let len = read_exact(buf, 2)?.get_i16();
                if len < 0 {
                    return Err(SchemaError::NegativeLength(len as i64));
                }
                let raw = take_bytes(buf, len as usize)?;
                let s = std::str::from_utf8(&raw).map_err(|_| SchemaError::InvalidUtf8)?;
                Ok(Value::Str(s.to_string()))
            }
            DataType::Bytes => {
                let len = read_exact(buf, 4)?.get_i32();
                if len < 0 {
                    return Err(SchemaError::NegativeLength(len as i64));
                }
                Ok(Value::Bytes(take_bytes(buf, len as usize)?))
            }
            DataType::Array(a) => {
                let count = read_exact(buf, 4)?.get_i32();
                if count == -1 {
                    if a.nullable {
                        return Ok(Value::Array(None));
                    }
                    return Err(SchemaError::NullNotAllowed("ARRAY"));
                }
                if count < 0 {
                    return Err(SchemaError::NegativeLength(count as i64));
                }
                // Each element occupies at least one byte on the wire,
                // so a count beyond the remaining bytes is a short frame.
                if count as usize > buf.remaining() {
                    return Err(SchemaError::InsufficientData {
                        needed: count as usize,
                        remaining: buf.remaining(),
                    });
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(a.elem.read(buf)?);
                }
                Ok(Value::Array(Some(items)))
            }
        }
    }
}

fn read_exact<B: Buf>(buf: &mut B, needed: usize) -> Result<&mut B, SchemaError> {
    if buf.remaining() < needed {
        return Err(SchemaError::InsufficientData {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(buf)
}

fn take_bytes<B: Buf>(buf: &mut B, len: usize) -> Result<Bytes, SchemaError> {
    if buf.remaining() < len {
        return Err(SchemaError::InsufficientData {
            needed: len,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.copy_to_bytes(len))
}
