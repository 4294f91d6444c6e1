//! Structure-only walk over serialized messages.
//!
//! The walker follows a schema through a buffer without building
//! [`Value`](crate::value::Value) trees. It reads only what it needs to find
//! field boundaries: variable-array length prefixes and delimiter headers.
//!
//! | Use case | Prefer |
//! |----------|--------|
//! | Bits occupied by one message | [`message_extent`] |
//! | Clear padding bits in a received buffer | [`zero_void_in_place`] |
//! | Full decode for inspection | [codec](crate::codec) |
//!
//! Length checks match the deserializer: sealed messages must be complete,
//! extensible ones are zero-extended and bounded by their extent.

use crate::codec::CodecError;
use crate::cursor::{clear_bits, BitReader};
use crate::schema::{field_path, Schema, TypeDescriptor};
use crate::validate::{Registry, DELIMITER_HEADER_BITS};

/// Read-only walker. Records the bit ranges of every void field it passes.
pub struct BinaryWalker<'a, 'b> {
    reader: BitReader<'b>,
    registry: &'a Registry,
    voids: Vec<(u64, u64)>,
}

impl<'a, 'b> BinaryWalker<'a, 'b> {
    /// Walker positioned at the start of a top-level message of `schema`.
    pub fn new(registry: &'a Registry, schema: &str, data: &'b [u8]) -> Result<Self, CodecError> {
        let resolved = registry.require(schema)?;
        let available = data.len() as u64 * 8;
        let reader = if resolved.schema.sealed {
            if available < resolved.layout.max_bits {
                return Err(CodecError::BufferUnderrun {
                    offset_bits: 0,
                    requested_bits: resolved.layout.max_bits,
                    available_bits: available,
                });
            }
            BitReader::new(data)
        } else {
            let extent = u64::from(resolved.schema.extent_bits.unwrap_or(0));
            if available > extent {
                return Err(CodecError::ExtentExceeded {
                    actual_bits: available,
                    extent_bits: extent,
                });
            }
            BitReader::zero_extended(data)
        };
        Ok(BinaryWalker {
            reader,
            registry,
            voids: Vec::new(),
        })
    }

    pub fn position(&self) -> u64 {
        self.reader.bit_offset()
    }

    /// Void ranges seen so far as `(bit_offset, width)`.
    pub fn voids(&self) -> &[(u64, u64)] {
        &self.voids
    }

    /// Walks every field of `schema` from the current position.
    pub fn skip_fields(&mut self, schema: &Schema) -> Result<(), CodecError> {
        self.skip_fields_at(schema, "")
    }

    fn skip_fields_at(&mut self, schema: &Schema, path: &str) -> Result<(), CodecError> {
        for field in &schema.fields {
            self.skip_value(&field.descriptor, &field_path(path, &field.name))?;
        }
        Ok(())
    }

    fn skip_value(&mut self, d: &TypeDescriptor, path: &str) -> Result<(), CodecError> {
        match d {
            TypeDescriptor::Bool => self.reader.skip(1),
            TypeDescriptor::UInt(w)
            | TypeDescriptor::Int(w)
            | TypeDescriptor::TruncatedUInt(w)
            | TypeDescriptor::Float(w) => self.reader.skip(u64::from(*w)),
            TypeDescriptor::Void(w) => {
                self.voids.push((self.reader.bit_offset(), u64::from(*w)));
                self.reader.skip(u64::from(*w))
            }
            TypeDescriptor::FixedArray(elem, count) => self.skip_elements(elem, *count, path),
            TypeDescriptor::VariableArray(elem, max) => {
                let len = self.reader.read_bits(TypeDescriptor::length_prefix_bits(*max))?;
                if len > *max {
                    return Err(CodecError::ArrayTooLong {
                        field: path.to_string(),
                        len,
                        max: *max,
                    });
                }
                self.skip_elements(elem, len, path)
            }
            TypeDescriptor::Composite(name) => {
                let nested = self.registry.require(name)?;
                self.reader.align(nested.schema.alignment_bits())?;
                if nested.schema.sealed {
                    return self.skip_fields_at(&nested.schema, path);
                }
                let len = self.reader.read_bits(DELIMITER_HEADER_BITS)?;
                let extent = u64::from(nested.schema.extent_bits.unwrap_or(0));
                let bits = len.saturating_mul(8);
                if bits > extent {
                    return Err(CodecError::ExtentExceeded {
                        actual_bits: bits,
                        extent_bits: extent,
                    });
                }
                let base = self.reader.bit_offset();
                let payload = self.reader.read_bytes(len as usize)?;
                let mut inner = BinaryWalker {
                    reader: BitReader::zero_extended(&payload),
                    registry: self.registry,
                    voids: Vec::new(),
                };
                inner.skip_fields_at(&nested.schema, path)?;
                // Voids past the delimited payload were never transmitted.
                for (offset, width) in inner.voids {
                    if offset < bits {
                        self.voids.push((base + offset, width.min(bits - offset)));
                    }
                }
                Ok(())
            }
        }
    }

    fn skip_elements(&mut self, elem: &TypeDescriptor, count: u64, path: &str) -> Result<(), CodecError> {
        if let Some(bits) = primitive_bits(elem) {
            return self.reader.skip(bits.saturating_mul(count));
        }
        for i in 0..count {
            self.skip_value(elem, &format!("{}[{}]", path, i))?;
        }
        Ok(())
    }
}

fn primitive_bits(d: &TypeDescriptor) -> Option<u64> {
    match d {
        TypeDescriptor::Bool => Some(1),
        TypeDescriptor::UInt(w)
        | TypeDescriptor::Int(w)
        | TypeDescriptor::TruncatedUInt(w)
        | TypeDescriptor::Float(w) => Some(u64::from(*w)),
        _ => None,
    }
}

/// Number of bits one message of `schema` occupies in `data`, before final byte padding.
///
/// For a truncated extensible message the result can exceed `data.len() * 8`:
/// the missing bits are implicit zeros.
pub fn message_extent(registry: &Registry, schema: &str, data: &[u8]) -> Result<u64, CodecError> {
    let resolved = registry.require(schema)?;
    let mut walker = BinaryWalker::new(registry, schema, data)?;
    walker.skip_fields(&resolved.schema)?;
    Ok(walker.position())
}

/// Zeroes every void field of a serialized message in place, including voids of
/// nested composites.
pub fn zero_void_in_place(registry: &Registry, schema: &str, data: &mut [u8]) -> Result<(), CodecError> {
    let resolved = registry.require(schema)?;
    let voids = {
        let mut walker = BinaryWalker::new(registry, schema, data)?;
        walker.skip_fields(&resolved.schema)?;
        walker.voids
    };
    for (offset, width) in voids {
        clear_bits(data, offset, width);
    }
    Ok(())
}
