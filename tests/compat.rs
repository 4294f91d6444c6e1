//! Forward/backward compatibility of extensible schemas across revisions.
//!
//! Revision 1.1 appends fields to revision 1.0 under the same extent. Each side
//! decodes what the other wrote: unknown trailing bits are ignored, missing ones
//! read as zero.

use bitschema::{Codec, CodecError, Registry, Schema, TypeDescriptor, Value};

const RECORD: &str = "demo.Record";

fn record_v1() -> Schema {
    Schema::builder(RECORD)
        .extent_bytes(16)
        .field("a", TypeDescriptor::UInt(8))
        .field("b", TypeDescriptor::UInt(16))
        .build()
}

fn record_v2() -> Schema {
    Schema::builder(RECORD)
        .extent_bytes(16)
        .field("a", TypeDescriptor::UInt(8))
        .field("b", TypeDescriptor::UInt(16))
        .field("c", TypeDescriptor::UInt(32))
        .field("tags", TypeDescriptor::variable_array(TypeDescriptor::UInt(8), 4))
        .build()
}

fn codec(schemas: Vec<Schema>) -> anyhow::Result<Codec> {
    Ok(Codec::new(Registry::resolve(schemas)?))
}

#[test]
fn test_old_reader_ignores_new_fields() -> anyhow::Result<()> {
    let old = codec(vec![record_v1()])?;
    let new = codec(vec![record_v2()])?;
    let v2 = Value::composite([
        ("a", Value::from(0xABu8)),
        ("b", Value::from(0x1234u16)),
        ("c", Value::from(0xDEAD_BEEFu32)),
        ("tags", Value::bytes(&[1, 2, 3])),
    ]);
    let bytes = new.serialize(RECORD, &v2)?;
    assert_eq!(&bytes[..3], &[0xAB, 0x12, 0x34]);

    let seen_by_old = old.deserialize(RECORD, &bytes)?;
    assert_eq!(
        seen_by_old,
        Value::composite([("a", Value::from(0xABu8)), ("b", Value::from(0x1234u16))])
    );
    Ok(())
}

#[test]
fn test_new_reader_zero_fills_missing_fields() -> anyhow::Result<()> {
    let old = codec(vec![record_v1()])?;
    let new = codec(vec![record_v2()])?;
    let v1 = Value::composite([("a", Value::from(7u8)), ("b", Value::from(513u16))]);
    let bytes = old.serialize(RECORD, &v1)?;
    assert_eq!(bytes, vec![0x07, 0x02, 0x01]);

    let seen_by_new = new.deserialize(RECORD, &bytes)?;
    assert_eq!(seen_by_new.get("a").and_then(Value::as_u64), Some(7));
    assert_eq!(seen_by_new.get("b").and_then(Value::as_u64), Some(513));
    assert_eq!(seen_by_new.get("c").and_then(Value::as_u64), Some(0));
    assert_eq!(seen_by_new.get("tags").and_then(Value::as_bytes), Some(Vec::new()));
    Ok(())
}

#[test]
fn test_extent_is_shared_across_revisions() -> anyhow::Result<()> {
    let old = codec(vec![record_v1()])?;
    assert_eq!(
        old.deserialize(RECORD, &[0u8; 17]).unwrap_err(),
        CodecError::ExtentExceeded {
            actual_bits: 136,
            extent_bits: 128
        }
    );
    // Anything within the extent is accepted, whatever follows the known fields.
    let v = old.deserialize(RECORD, &[0xFF; 16])?;
    assert_eq!(v.get("b").and_then(Value::as_u64), Some(0xFFFF));
    Ok(())
}

fn endpoint_v1() -> Schema {
    Schema::builder("demo.Endpoint")
        .extent_bytes(8)
        .field("port", TypeDescriptor::UInt(16))
        .build()
}

fn endpoint_v2() -> Schema {
    Schema::builder("demo.Endpoint")
        .extent_bytes(8)
        .field("port", TypeDescriptor::UInt(16))
        .field("tos", TypeDescriptor::UInt(6))
        .field("ecn", TypeDescriptor::UInt(2))
        .build()
}

fn route() -> Schema {
    Schema::builder("demo.Route")
        .extent_bytes(64)
        .field("hops", TypeDescriptor::variable_array(TypeDescriptor::composite("demo.Endpoint"), 3))
        .field("tail", TypeDescriptor::UInt(8))
        .build()
}

fn endpoint(port: u16, tos: u8, ecn: u8) -> Value {
    Value::composite([
        ("port", Value::from(port)),
        ("tos", Value::from(tos)),
        ("ecn", Value::from(ecn)),
    ])
}

#[test]
fn test_nested_delimited_forward_compat() -> anyhow::Result<()> {
    let old = codec(vec![endpoint_v1(), route()])?;
    let new = codec(vec![endpoint_v2(), route()])?;
    let v = Value::composite([
        (
            "hops",
            Value::from(vec![endpoint(80, 3, 1), endpoint(443, 63, 2)]),
        ),
        ("tail", Value::from(0x7Fu8)),
    ]);
    let bytes = new.serialize("demo.Route", &v)?;
    // 2-bit count, then per hop a 32-bit header and 3 payload bytes, then the tail.
    assert_eq!(bytes.len(), (2 + 2 * (32 + 24) + 8 + 7) / 8);

    let seen_by_old = old.deserialize("demo.Route", &bytes)?;
    let hops = seen_by_old.get("hops").and_then(Value::as_array).unwrap_or(&[]);
    assert_eq!(hops.len(), 2);
    assert_eq!(hops[0], Value::composite([("port", Value::from(80u16))]));
    assert_eq!(hops[1], Value::composite([("port", Value::from(443u16))]));
    assert_eq!(seen_by_old.get("tail").and_then(Value::as_u64), Some(0x7F));
    Ok(())
}

#[test]
fn test_nested_delimited_backward_compat() -> anyhow::Result<()> {
    let old = codec(vec![endpoint_v1(), route()])?;
    let new = codec(vec![endpoint_v2(), route()])?;
    let v = Value::composite([
        (
            "hops",
            Value::from(vec![Value::composite([("port", Value::from(8080u16))])]),
        ),
        ("tail", Value::from(1u8)),
    ]);
    let bytes = old.serialize("demo.Route", &v)?;
    let seen_by_new = new.deserialize("demo.Route", &bytes)?;
    let hops = seen_by_new.get("hops").and_then(Value::as_array).unwrap_or(&[]);
    assert_eq!(hops, [endpoint(8080, 0, 0)]);
    assert_eq!(seen_by_new.get("tail").and_then(Value::as_u64), Some(1));
    Ok(())
}

#[test]
fn test_sealed_schema_has_no_slack() -> anyhow::Result<()> {
    let sealed = codec(vec![Schema::builder("demo.Fixed")
        .sealed()
        .field("a", TypeDescriptor::UInt(8))
        .field("b", TypeDescriptor::UInt(16))
        .build()])?;
    let bytes = sealed.serialize(
        "demo.Fixed",
        &Value::composite([("a", Value::from(1u8)), ("b", Value::from(2u16))]),
    )?;
    assert_eq!(bytes.len(), 3);
    assert!(matches!(
        sealed.deserialize("demo.Fixed", &bytes[..2]),
        Err(CodecError::BufferUnderrun { .. })
    ));
    let mut longer = bytes.clone();
    longer.extend_from_slice(&[0, 0, 9]);
    assert_eq!(
        sealed.deserialize("demo.Fixed", &longer).unwrap_err(),
        CodecError::UnexpectedTrailingData { offset_bits: 40 }
    );
    Ok(())
}
