//! Schema model: type descriptors, fields, offset assertions and the builder.
//!
//! A [`Schema`] is plain data. It is checked and indexed by
//! [`Registry::resolve`](crate::validate::Registry::resolve), after which it is
//! immutable and shared by every codec operation.

use std::collections::BTreeSet;
use std::fmt;

/// Field type. Closed set; the codec matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Bool,
    /// Unsigned integer, range-checked on serialize.
    UInt(u32),
    /// Two's complement signed integer, range-checked on serialize.
    Int(u32),
    /// Unsigned integer whose excess high bits are discarded on serialize.
    TruncatedUInt(u32),
    /// IEEE-754 binary32 or binary64. Values are held as `f64`; writing a
    /// binary32 field rounds to the nearest `f32`, so it is lossy.
    Float(u32),
    FixedArray(Box<TypeDescriptor>, u64),
    /// Preceded by a length prefix of `bit_length(max_count)` bits.
    VariableArray(Box<TypeDescriptor>, u64),
    /// Reference to another schema in the same registry, by name.
    Composite(String),
    /// Padding: written as zeros, skipped on read.
    Void(u32),
}

impl TypeDescriptor {
    pub fn fixed_array(elem: TypeDescriptor, count: u64) -> Self {
        TypeDescriptor::FixedArray(Box::new(elem), count)
    }

    pub fn variable_array(elem: TypeDescriptor, max_count: u64) -> Self {
        TypeDescriptor::VariableArray(Box::new(elem), max_count)
    }

    pub fn composite(name: impl Into<String>) -> Self {
        TypeDescriptor::Composite(name.into())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Void(_))
    }

    /// Width of the implicit length prefix of a variable-length array.
    pub fn length_prefix_bits(max_count: u64) -> u32 {
        crate::cursor::bit_length(max_count)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::UInt(w) => write!(f, "uint{}", w),
            TypeDescriptor::Int(w) => write!(f, "int{}", w),
            TypeDescriptor::TruncatedUInt(w) => write!(f, "truncated uint{}", w),
            TypeDescriptor::Float(w) => write!(f, "float{}", w),
            TypeDescriptor::FixedArray(e, n) => write!(f, "{}[{}]", e, n),
            TypeDescriptor::VariableArray(e, n) => write!(f, "{}[<={}]", e, n),
            TypeDescriptor::Composite(name) => write!(f, "{}", name),
            TypeDescriptor::Void(w) => write!(f, "void{}", w),
        }
    }
}

/// Dotted path of `name` inside `parent`, used as error context.
pub(crate) fn field_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub descriptor: TypeDescriptor,
}

/// Invariant on the cumulative bit offset at a point between fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assertion {
    /// Every possible offset modulo `modulus` is one of `residues`.
    OffsetModulo { modulus: u64, residues: BTreeSet<u64> },
    /// The largest possible offset is at most this many bits.
    MaxOffsetAtMost(u64),
    /// The largest possible offset is exactly this many bits.
    MaxOffsetEquals(u64),
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::OffsetModulo { modulus, residues } => {
                let rs: Vec<String> = residues.iter().map(|r| r.to_string()).collect();
                write!(f, "_offset_ % {} == {{{}}}", modulus, rs.join(", "))
            }
            Assertion::MaxOffsetAtMost(n) => write!(f, "_offset_.max <= {}", n),
            Assertion::MaxOffsetEquals(n) => write!(f, "_offset_.max == {}", n),
        }
    }
}

/// An assertion evaluated after the first `position` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedAssertion {
    pub position: usize,
    pub assertion: Assertion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
    pub sealed: bool,
    pub extent_bits: Option<u32>,
    /// Nested occurrences start on a byte boundary.
    pub byte_aligned: bool,
    pub assertions: Vec<PlacedAssertion>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name && !f.descriptor.is_void())
    }

    /// Alignment in bits applied before a nested occurrence of this schema.
    pub fn alignment_bits(&self) -> u32 {
        if self.byte_aligned {
            8
        } else {
            1
        }
    }
}

/// Programmatic schema construction. Fields and assertions are recorded in call order.
///
/// ```
/// use bitschema::{Schema, TypeDescriptor};
///
/// let sync = Schema::builder("uavcan.time.Synchronization")
///     .sealed()
///     .field("previous_transmission_timestamp_microsecond", TypeDescriptor::TruncatedUInt(56))
///     .assert_max_offset_at_most(56)
///     .build();
/// assert!(sync.sealed);
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        SchemaBuilder {
            schema: Schema {
                name: name.into(),
                fields: Vec::new(),
                sealed: false,
                extent_bits: None,
                byte_aligned: false,
                assertions: Vec::new(),
            },
        }
    }

    pub fn sealed(mut self) -> Self {
        self.schema.sealed = true;
        self
    }

    pub fn extent_bits(mut self, bits: u32) -> Self {
        self.schema.extent_bits = Some(bits);
        self
    }

    pub fn extent_bytes(self, bytes: u32) -> Self {
        self.extent_bits(bytes.saturating_mul(8))
    }

    pub fn byte_aligned(mut self) -> Self {
        self.schema.byte_aligned = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        self.schema.fields.push(Field {
            name: name.into(),
            descriptor,
        });
        self
    }

    /// Unnamed padding field.
    pub fn void(mut self, width: u32) -> Self {
        self.schema.fields.push(Field {
            name: String::new(),
            descriptor: TypeDescriptor::Void(width),
        });
        self
    }

    pub fn assert(mut self, assertion: Assertion) -> Self {
        let position = self.schema.fields.len();
        self.schema.assertions.push(PlacedAssertion { position, assertion });
        self
    }

    /// `_offset_ % modulus == {residues}` at the current position.
    pub fn assert_offset_modulo(self, modulus: u64, residues: impl IntoIterator<Item = u64>) -> Self {
        self.assert(Assertion::OffsetModulo {
            modulus,
            residues: residues.into_iter().collect(),
        })
    }

    /// `_offset_ % 8 == {0}` at the current position.
    pub fn assert_byte_aligned_offset(self) -> Self {
        self.assert_offset_modulo(8, [0])
    }

    pub fn assert_max_offset_at_most(self, bits: u64) -> Self {
        self.assert(Assertion::MaxOffsetAtMost(bits))
    }

    pub fn assert_max_offset_equals(self, bits: u64) -> Self {
        self.assert(Assertion::MaxOffsetEquals(bits))
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_places_assertions_after_preceding_fields() {
        let s = Schema::builder("A")
            .field("a", TypeDescriptor::UInt(8))
            .assert_byte_aligned_offset()
            .void(4)
            .field("b", TypeDescriptor::Bool)
            .assert_max_offset_at_most(13)
            .extent_bytes(8)
            .build();
        assert_eq!(s.fields.len(), 3);
        assert_eq!(s.assertions[0].position, 1);
        assert_eq!(s.assertions[1].position, 3);
        assert_eq!(s.extent_bits, Some(64));
        assert!(s.field("b").is_some());
        assert!(s.field("").is_none());
    }

    #[test]
    fn descriptor_display() {
        let d = TypeDescriptor::variable_array(TypeDescriptor::UInt(8), 45);
        assert_eq!(d.to_string(), "uint8[<=45]");
        let a = Assertion::OffsetModulo {
            modulus: 8,
            residues: [0, 4].into_iter().collect(),
        };
        assert_eq!(a.to_string(), "_offset_ % 8 == {0, 4}");
    }
}
