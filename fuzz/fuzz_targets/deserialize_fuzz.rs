//! Deserializer fuzz target: feed arbitrary bytes to every schema of a small bus registry.
//! Decoding must not panic; it returns Ok(Value) or a CodecError. Anything that decodes
//! must re-encode and must also be accepted by the walker.
//! Build with: cargo fuzz run deserialize_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use bitschema::{message_extent, Codec, Registry, Schema, TypeDescriptor};
#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fn registry() -> Option<Registry> {
    let bytes = |max| TypeDescriptor::variable_array(TypeDescriptor::UInt(8), max);
    Registry::resolve(vec![
        Schema::builder("Sync")
            .sealed()
            .field("timestamp", TypeDescriptor::TruncatedUInt(56))
            .build(),
        Schema::builder("Endpoint")
            .extent_bytes(16)
            .field("port", TypeDescriptor::UInt(16))
            .field("address", bytes(4))
            .build(),
        Schema::builder("Packet")
            .extent_bytes(128)
            .field("session_id", TypeDescriptor::UInt(16))
            .void(3)
            .field("offset", TypeDescriptor::Int(13))
            .field("endpoints", TypeDescriptor::variable_array(TypeDescriptor::composite("Endpoint"), 3))
            .field("gain", TypeDescriptor::Float(32))
            .field("payload", bytes(45))
            .build(),
    ])
    .ok()
}

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Some(registry) = registry() else {
        return;
    };
    let codec = Codec::new(registry);
    for name in ["Sync", "Endpoint", "Packet"] {
        let decoded = codec.deserialize(name, data);
        let walked = message_extent(codec.registry(), name, data);
        if let Ok(value) = decoded {
            assert!(walked.is_ok());
            assert!(codec.serialize(name, &value).is_ok());
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run deserialize_fuzz");
}
