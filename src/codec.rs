//! Codec façade: serialize and deserialize values against a resolved [`Registry`].
//!
//! Serialization refuses values that do not fit the schema (missing fields,
//! out-of-range integers, oversized arrays). Deserialization treats its input as
//! untrusted: every malformed buffer yields a [`CodecError`], never a panic, and
//! no partial value is returned.

use crate::deserialize::Deserializer;
use crate::serialize::Serializer;
use crate::validate::Registry;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("schema {schema}: assertion `{assertion}` violated (computed {computed})")]
    SchemaAssertionViolation {
        schema: String,
        assertion: String,
        computed: String,
    },
    #[error("schema {schema}: {reason}")]
    InvalidSchema { schema: String, reason: String },
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("field missing: {field}")]
    FieldMissing { field: String },
    #[error("field {field}: expected {expected} array elements, got {actual}")]
    ArrayLengthMismatch {
        field: String,
        expected: u64,
        actual: u64,
    },
    #[error("field {field}: {value} does not fit {descriptor}")]
    IntegerOutOfRange {
        field: String,
        value: String,
        descriptor: String,
    },
    #[error("field {field}: array length {len} exceeds maximum {max}")]
    ArrayTooLong { field: String, len: u64, max: u64 },
    #[error("field {field}: expected a {expected} value")]
    TypeMismatch { field: String, expected: String },
    #[error("capacity exceeded: {requested_bits} bits requested, capacity is {capacity_bits}")]
    CapacityExceeded { requested_bits: u64, capacity_bits: u64 },
    #[error("buffer underrun at bit {offset_bits}: {requested_bits} bits requested, {available_bits} available")]
    BufferUnderrun {
        offset_bits: u64,
        requested_bits: u64,
        available_bits: u64,
    },
    #[error("extent exceeded: {actual_bits} bits, extent is {extent_bits}")]
    ExtentExceeded { actual_bits: u64, extent_bits: u64 },
    #[error("unexpected non-zero trailing data at bit {offset_bits}")]
    UnexpectedTrailingData { offset_bits: u64 },
    #[error("invalid bit width: {0}")]
    InvalidWidth(u32),
}

/// What a sealed-schema deserializer does with non-zero bytes after the fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingDataPolicy {
    #[default]
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecConfig {
    pub trailing_data: TrailingDataPolicy,
}

#[derive(Debug)]
pub struct Codec {
    pub config: CodecConfig,
    registry: Registry,
}

impl Codec {
    pub fn new(registry: Registry) -> Self {
        Self::with_config(registry, CodecConfig::default())
    }

    pub fn with_config(registry: Registry, config: CodecConfig) -> Self {
        Codec { config, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serialize `value` (a [`Value::Composite`]) as the named schema.
    ///
    /// The output is byte-padded: its length is the fixed length rounded up to a
    /// byte for sealed schemas, and at most the extent for extensible ones.
    pub fn serialize(&self, schema: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        Serializer::new(&self.registry).serialize(schema, value)
    }

    /// Deserialize one message of the named schema from `bytes`.
    pub fn deserialize(&self, schema: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let result = Deserializer::new(&self.registry, self.config).deserialize(schema, bytes);
        if let Err(ref e) = result {
            log::trace!("rejected {} byte(s) as {}: {}", bytes.len(), schema, e);
        }
        result
    }
}
