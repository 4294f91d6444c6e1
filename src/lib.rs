//! # bitschema: bit-packed codec for DSDL-style bus schemas
//!
//! Schemas describe vehicle-bus messages (time synchronization, UDP tunnelling,
//! serial byte chunks) as ordered fields with bit-exact widths. This crate
//! validates such schemas once, then serializes and deserializes values against
//! them into a compact, platform-independent, MSB-first bit-packed form.
//!
//! ## Schema model
//!
//! - Fields: `bool`, `uintN`, `intN`, `truncated uintN` (N = 1..=64), `float32`,
//!   `float64`, `voidN` padding, fixed arrays `T[n]`, variable arrays `T[<=n]`
//!   (implicit length prefix of `bit_length(n)` bits) and nested composites.
//! - **Sealed** schemas have one fixed length forever. **Extensible** schemas
//!   declare an extent: the maximum length any future revision may reach.
//!   Readers zero-fill missing trailing bits and ignore unknown ones.
//! - Assertions (`_offset_ % 8 == {0}`, `_offset_.max <= N`) are checked
//!   statically when the schema set is resolved.
//!
//! ## Example
//!
//! ```
//! use bitschema::{Codec, Registry, Schema, TypeDescriptor, Value};
//!
//! let sync = Schema::builder("uavcan.time.Synchronization")
//!     .sealed()
//!     .field("previous_transmission_timestamp_microsecond", TypeDescriptor::TruncatedUInt(56))
//!     .assert_max_offset_at_most(56)
//!     .build();
//! let codec = Codec::new(Registry::resolve(vec![sync]).unwrap());
//!
//! let msg = Value::composite([("previous_transmission_timestamp_microsecond", Value::from(1_000_000u64))]);
//! let bytes = codec.serialize("uavcan.time.Synchronization", &msg).unwrap();
//! assert_eq!(bytes, [0x00, 0x00, 0x00, 0x00, 0x0F, 0x42, 0x40]);
//! assert_eq!(codec.deserialize("uavcan.time.Synchronization", &bytes).unwrap(), msg);
//! ```
//!
//! See `tests/integration.rs` for the UDP and serial message families.

pub mod codec;
pub mod cursor;
pub mod deserialize;
pub mod schema;
pub mod serialize;
pub mod validate;
pub mod value;
pub mod walk;

pub use codec::{Codec, CodecConfig, CodecError, TrailingDataPolicy};
pub use schema::{Assertion, Field, Schema, SchemaBuilder, TypeDescriptor};
pub use validate::{validate_schema, BitLengthSet, Registry, ResolvedSchema, SchemaLayout};
pub use value::Value;
pub use walk::{message_extent, zero_void_in_place, BinaryWalker};
