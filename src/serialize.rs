//! Value tree → bit-packed bytes.

use crate::codec::CodecError;
use crate::cursor::BitWriter;
use crate::schema::{field_path, Schema, TypeDescriptor};
use crate::validate::{Registry, DELIMITER_HEADER_BITS};
use crate::value::Value;

pub struct Serializer<'a> {
    registry: &'a Registry,
}

fn mismatch(path: &str, expected: &str) -> CodecError {
    CodecError::TypeMismatch {
        field: path.to_string(),
        expected: expected.to_string(),
    }
}

fn out_of_range(path: &str, value: &dyn std::fmt::Display, d: &TypeDescriptor) -> CodecError {
    CodecError::IntegerOutOfRange {
        field: path.to_string(),
        value: value.to_string(),
        descriptor: d.to_string(),
    }
}

impl<'a> Serializer<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Serializer { registry }
    }

    pub fn serialize(&self, name: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        let resolved = self.registry.require(name)?;
        let mut w = BitWriter::with_capacity(resolved.capacity_bits());
        if value.as_composite().is_none() {
            return Err(mismatch(name, "composite"));
        }
        self.write_fields(&mut w, &resolved.schema, value, "")?;
        // Sealed: the fixed length, padded to the byte. Extensible: anywhere up to
        // the extent, which is a whole number of bytes.
        w.align(8)?;
        Ok(w.into_bytes())
    }

    fn write_fields(
        &self,
        w: &mut BitWriter,
        schema: &Schema,
        value: &Value,
        path: &str,
    ) -> Result<(), CodecError> {
        let record = value
            .as_composite()
            .ok_or_else(|| mismatch(path, "composite"))?;
        for field in &schema.fields {
            if let TypeDescriptor::Void(width) = field.descriptor {
                w.write_zeros(u64::from(width))?;
                continue;
            }
            let path = field_path(path, &field.name);
            let v = record
                .get(&field.name)
                .ok_or_else(|| CodecError::FieldMissing { field: path.clone() })?;
            self.write_value(w, &field.descriptor, v, &path)?;
        }
        Ok(())
    }

    fn write_value(
        &self,
        w: &mut BitWriter,
        d: &TypeDescriptor,
        v: &Value,
        path: &str,
    ) -> Result<(), CodecError> {
        match d {
            TypeDescriptor::Bool => match v {
                Value::Bool(b) => w.write_bool(*b),
                _ => Err(mismatch(path, "bool")),
            },
            TypeDescriptor::UInt(width) => {
                let u = match v {
                    Value::UInt(u) => *u,
                    Value::Int(i) => u64::try_from(*i).map_err(|_| out_of_range(path, i, d))?,
                    _ => return Err(mismatch(path, "integer")),
                };
                if *width < 64 && u >> width != 0 {
                    return Err(out_of_range(path, &u, d));
                }
                w.write_bits(u, *width)
            }
            TypeDescriptor::Int(width) => {
                let i = match v {
                    Value::Int(i) => *i,
                    Value::UInt(u) => i64::try_from(*u).map_err(|_| out_of_range(path, u, d))?,
                    _ => return Err(mismatch(path, "integer")),
                };
                if *width < 64 {
                    let min = -(1i64 << (width - 1));
                    let max = (1i64 << (width - 1)) - 1;
                    if i < min || i > max {
                        return Err(out_of_range(path, &i, d));
                    }
                }
                w.write_bits(i as u64, *width)
            }
            TypeDescriptor::TruncatedUInt(width) => {
                let u = match v {
                    Value::UInt(u) => *u,
                    Value::Int(i) => *i as u64,
                    _ => return Err(mismatch(path, "integer")),
                };
                w.write_bits(u, *width)
            }
            TypeDescriptor::Float(width) => {
                let f = match v {
                    Value::Float(f) => *f,
                    _ => return Err(mismatch(path, "float")),
                };
                match *width {
                    32 => w.write_bits(u64::from((f as f32).to_bits()), 32),
                    64 => w.write_bits(f.to_bits(), 64),
                    other => Err(CodecError::InvalidWidth(other)),
                }
            }
            TypeDescriptor::Void(width) => w.write_zeros(u64::from(*width)),
            TypeDescriptor::FixedArray(elem, count) => {
                let items = v.as_array().ok_or_else(|| mismatch(path, "array"))?;
                if items.len() as u64 != *count {
                    return Err(CodecError::ArrayLengthMismatch {
                        field: path.to_string(),
                        expected: *count,
                        actual: items.len() as u64,
                    });
                }
                self.write_elements(w, elem, items, path)
            }
            TypeDescriptor::VariableArray(elem, max) => {
                let items = v.as_array().ok_or_else(|| mismatch(path, "array"))?;
                let len = items.len() as u64;
                if len > *max {
                    return Err(CodecError::ArrayTooLong {
                        field: path.to_string(),
                        len,
                        max: *max,
                    });
                }
                w.write_bits(len, TypeDescriptor::length_prefix_bits(*max))?;
                self.write_elements(w, elem, items, path)
            }
            TypeDescriptor::Composite(name) => {
                let nested = self.registry.require(name)?;
                w.align(nested.schema.alignment_bits())?;
                if nested.schema.sealed {
                    return self.write_fields(w, &nested.schema, v, path);
                }
                // Extensible nested values are delimited so readers built against
                // another revision can skip exactly this many bytes.
                let mut sub = BitWriter::with_capacity(nested.capacity_bits());
                self.write_fields(&mut sub, &nested.schema, v, path)?;
                sub.align(8)?;
                let bytes = sub.into_bytes();
                w.write_bits(bytes.len() as u64, DELIMITER_HEADER_BITS)?;
                w.write_bytes(&bytes)
            }
        }
    }

    fn write_elements(
        &self,
        w: &mut BitWriter,
        elem: &TypeDescriptor,
        items: &[Value],
        path: &str,
    ) -> Result<(), CodecError> {
        for (i, item) in items.iter().enumerate() {
            self.write_value(w, elem, item, &format!("{}[{}]", path, i))?;
        }
        Ok(())
    }
}
