//! Bit-packed bytes → value tree.
//!
//! Input is untrusted. Every length read from the wire is checked against the
//! schema before anything is allocated for it.

use crate::codec::{CodecConfig, CodecError, TrailingDataPolicy};
use crate::cursor::{align_up, BitReader};
use crate::schema::{field_path, Schema, TypeDescriptor};
use crate::validate::{Registry, DELIMITER_HEADER_BITS};
use crate::value::Value;
use std::collections::HashMap;

pub struct Deserializer<'a> {
    registry: &'a Registry,
    config: CodecConfig,
}

/// Sign-extends the low `width` bits of `raw`.
fn sign_extend(raw: u64, width: u32) -> i64 {
    if width >= 64 {
        return raw as i64;
    }
    let shift = 64 - width;
    ((raw << shift) as i64) >> shift
}

impl<'a> Deserializer<'a> {
    pub fn new(registry: &'a Registry, config: CodecConfig) -> Self {
        Deserializer { registry, config }
    }

    pub fn deserialize(&self, name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let resolved = self.registry.require(name)?;
        let available = bytes.len() as u64 * 8;

        if resolved.schema.sealed {
            let fixed = resolved.layout.max_bits;
            if available < fixed {
                return Err(CodecError::BufferUnderrun {
                    offset_bits: 0,
                    requested_bits: fixed,
                    available_bits: available,
                });
            }
            let mut r = BitReader::new(bytes);
            let value = self.read_fields(&mut r, &resolved.schema, "")?;
            if self.config.trailing_data == TrailingDataPolicy::Reject {
                // Bits up to the byte boundary are padding; whole bytes after it are not.
                let padded = (align_up(fixed, 8) / 8) as usize;
                if let Some(i) = bytes[padded..].iter().position(|&b| b != 0) {
                    return Err(CodecError::UnexpectedTrailingData {
                        offset_bits: (padded + i) as u64 * 8,
                    });
                }
            }
            return Ok(value);
        }

        let extent = u64::from(resolved.schema.extent_bits.unwrap_or(0));
        if available > extent {
            return Err(CodecError::ExtentExceeded {
                actual_bits: available,
                extent_bits: extent,
            });
        }
        // Missing trailing bits read as zero; unknown trailing bits are never read.
        let mut r = BitReader::zero_extended(bytes);
        self.read_fields(&mut r, &resolved.schema, "")
    }

    fn read_fields(&self, r: &mut BitReader<'_>, schema: &Schema, path: &str) -> Result<Value, CodecError> {
        let mut out = HashMap::with_capacity(schema.fields.len());
        for field in &schema.fields {
            if let TypeDescriptor::Void(width) = field.descriptor {
                r.skip(u64::from(width))?;
                continue;
            }
            let path = field_path(path, &field.name);
            let v = self.read_value(r, &field.descriptor, &path)?;
            out.insert(field.name.clone(), v);
        }
        Ok(Value::Composite(out))
    }

    fn read_value(&self, r: &mut BitReader<'_>, d: &TypeDescriptor, path: &str) -> Result<Value, CodecError> {
        match d {
            TypeDescriptor::Bool => Ok(Value::Bool(r.read_bool()?)),
            TypeDescriptor::UInt(width) | TypeDescriptor::TruncatedUInt(width) => {
                Ok(Value::UInt(r.read_bits(*width)?))
            }
            TypeDescriptor::Int(width) => Ok(Value::Int(sign_extend(r.read_bits(*width)?, *width))),
            TypeDescriptor::Float(width) => match *width {
                32 => Ok(Value::Float(f64::from(f32::from_bits(r.read_bits(32)? as u32)))),
                64 => Ok(Value::Float(f64::from_bits(r.read_bits(64)?))),
                other => Err(CodecError::InvalidWidth(other)),
            },
            // Voids are skipped in read_fields; arrays of void never validate.
            TypeDescriptor::Void(_) => Err(CodecError::InvalidSchema {
                schema: path.to_string(),
                reason: "void in value position".to_string(),
            }),
            TypeDescriptor::FixedArray(elem, count) => self.read_elements(r, elem, *count, path),
            TypeDescriptor::VariableArray(elem, max) => {
                let len = r.read_bits(TypeDescriptor::length_prefix_bits(*max))?;
                if len > *max {
                    return Err(CodecError::ArrayTooLong {
                        field: path.to_string(),
                        len,
                        max: *max,
                    });
                }
                self.read_elements(r, elem, len, path)
            }
            TypeDescriptor::Composite(name) => {
                let nested = self.registry.require(name)?;
                r.align(nested.schema.alignment_bits())?;
                if nested.schema.sealed {
                    return self.read_fields(r, &nested.schema, path);
                }
                let len = r.read_bits(DELIMITER_HEADER_BITS)?;
                let extent = u64::from(nested.schema.extent_bits.unwrap_or(0));
                if len.saturating_mul(8) > extent {
                    return Err(CodecError::ExtentExceeded {
                        actual_bits: len.saturating_mul(8),
                        extent_bits: extent,
                    });
                }
                let payload = r.read_bytes(len as usize)?;
                let mut sub = BitReader::zero_extended(&payload);
                self.read_fields(&mut sub, &nested.schema, path)
            }
        }
    }

    fn read_elements(
        &self,
        r: &mut BitReader<'_>,
        elem: &TypeDescriptor,
        count: u64,
        path: &str,
    ) -> Result<Value, CodecError> {
        let mut items = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for i in 0..count {
            items.push(self.read_value(r, elem, &format!("{}[{}]", path, i))?);
        }
        Ok(Value::Array(items))
    }
}
