//! Declarative message layouts.
//!
//! A `Schema` is an ordered list of named, typed fields; field order is
//! the only positional contract on the wire (there are no tags). A
//! `Struct` binds a schema to concrete values and is the unit handed to
//! encode/decode.

use super::types::{DataType, SchemaError, Value};
use bytes::{Buf, BufMut};

/// A named, typed slot in a schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub doc: &'static str,
    pub typ: DataType,
}

impl Field {
    pub const fn new(name: &'static str, doc: &'static str, typ: DataType) -> Self {
        Self { name, doc, typ }
    }
}

/// Ordered field declaration describing one message's wire layout.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Decode a full struct by reading every field in schema order.
    pub fn read<B: Buf>(&'static self, buf: &mut B) -> Result<Struct, SchemaError> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            values.push(Some(field.typ.read(buf)?));
        }
        Ok(Struct {
            schema: self,
            values,
        })
    }

    /// An empty struct bound to this schema, to be filled via `set`.
    pub fn new_struct(&'static self) -> Struct {
        Struct {
            schema: self,
            values: vec![None; self.fields.len()],
        }
    }
}

/// Schema-bound value container, produced by decode or built field by
/// field before encode.
#[derive(Debug, Clone)]
pub struct Struct {
    schema: &'static Schema,
    values: Vec<Option<Value>>,
}

impl Struct {
    /// Set a field after validating the value against its declared type.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), SchemaError> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;
        self.schema.fields[idx].typ.validate(&value)?;
        self.values[idx] = Some(value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Value, SchemaError> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;
        self.values[idx]
            .as_ref()
            .ok_or(SchemaError::MissingField(self.schema.fields[idx].name))
    }

    /// Exact encoded size in bytes. Frame buffers are sized from this
    /// before body encoding, so it must match `write_to` to the byte.
    pub fn size_of(&self) -> Result<usize, SchemaError> {
        let mut total = 0;
        for (field, value) in self.schema.fields.iter().zip(&self.values) {
            let value = value.as_ref().ok_or(SchemaError::MissingField(field.name))?;
            total += field.typ.size_of(value)?;
        }
        Ok(total)
    }

    /// Encode every field in schema order.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<(), SchemaError> {
        for (field, value) in self.schema.fields.iter().zip(&self.values) {
            let value = value.as_ref().ok_or(SchemaError::MissingField(field.name))?;
            field.typ.write(buf, value)?;
        }
        Ok(())
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.schema, other.schema) && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::ArrayOf;
    use bytes::Bytes;
    use std::sync::OnceLock;

    fn test_schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new(vec![
                Field::new("id", "record id", DataType::Int64),
                Field::new("name", "record name", DataType::Str),
                Field::new("payload", "opaque payload", DataType::Bytes),
                Field::new(
                    "tags",
                    "optional tag list",
                    DataType::Array(ArrayOf::nullable(DataType::Str)),
                ),
            ])
        })
    }

    fn sample() -> Struct {
        let mut s = test_schema().new_struct();
        s.set("id", Value::Int64(42)).unwrap();
        s.set("name", Value::Str("alpha".into())).unwrap();
        s.set("payload", Value::Bytes(Bytes::from_static(b"\x00\x01")))
            .unwrap();
        s.set("tags", Value::Array(Some(vec![Value::Str("t1".into())])))
            .unwrap();
        s
    }

    #[test]
    fn test_struct_round_trip() {
        let original = sample();
        let mut buf = Vec::new();
        original.write_to(&mut buf).unwrap();

        let mut cursor = Bytes::from(buf);
        let decoded = test_schema().read(&mut cursor).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(cursor.len(), 0);
    }

    #[test]
    fn test_size_of_matches_encoded_length() {
        let s = sample();
        let mut buf = Vec::new();
        s.write_to(&mut buf).unwrap();
        assert_eq!(s.size_of().unwrap(), buf.len());

        // Including when variable-length fields are empty.
        let mut empty = test_schema().new_struct();
        empty.set("id", Value::Int64(0)).unwrap();
        empty.set("name", Value::Str(String::new())).unwrap();
        empty.set("payload", Value::Bytes(Bytes::new())).unwrap();
        empty.set("tags", Value::Array(None)).unwrap();
        let mut buf = Vec::new();
        empty.write_to(&mut buf).unwrap();
        assert_eq!(empty.size_of().unwrap(), buf.len());
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut s = test_schema().new_struct();
        assert!(matches!(
            s.set("id", Value::Int32(1)),
            Err(SchemaError::TypeMismatch { .. })
        ));
        assert!(matches!(
            s.set("nope", Value::Int32(1)),
            Err(SchemaError::UnknownField(_))
        ));
    }

    #[test]
    fn test_missing_field_blocks_encode() {
        let mut s = test_schema().new_struct();
        s.set("id", Value::Int64(1)).unwrap();
        assert_eq!(
            s.size_of().unwrap_err(),
            SchemaError::MissingField("name")
        );
        assert_eq!(
            s.write_to(&mut Vec::new()).unwrap_err(),
            SchemaError::MissingField("name")
        );
    }

    #[test]
    fn test_short_buffer_is_insufficient_data() {
        let mut cursor = Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 1, 0, 3, b'a']);
        assert!(matches!(
            test_schema().read(&mut cursor),
            Err(SchemaError::InsufficientData { .. })
        ));
    }
}
