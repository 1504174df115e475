//! Skipping unknown fields leaves the stream exactly after the struct.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use wirecall_core::config::Configuration;
use wirecall_core::model::{DynamicStruct, FieldType, StructDescriptor, Value, WireStruct};
use wirecall_core::protocol::{
    skip_with_depth, BinaryCodec, CompactCodec, JsonCodec, TType, WireCodec,
};
use wirecall_core::transport::{MemoryBuffer, MemoryInput};

const MARKER: i32 = 0x7777;

fn inner_desc() -> Arc<StructDescriptor> {
    StructDescriptor::new("Inner")
        .optional(1, "samples", FieldType::list(FieldType::I64))
        .optional(2, "tags", FieldType::map(FieldType::String, FieldType::Double))
        .build()
}

fn newer_desc() -> Arc<StructDescriptor> {
    StructDescriptor::new("Record")
        .required(1, "id", FieldType::I32)
        .optional(5, "label", FieldType::String)
        .optional(9, "inner", FieldType::Struct(inner_desc()))
        .build()
}

fn older_desc() -> Arc<StructDescriptor> {
    StructDescriptor::new("Record")
        .required(1, "id", FieldType::I32)
        .build()
}

fn newer_record() -> DynamicStruct {
    let mut tags = std::collections::BTreeMap::new();
    tags.insert(Value::from("p99"), Value::Double(12.5));
    let inner = DynamicStruct::new(inner_desc())
        .with(1, Value::List(vec![Value::I64(1), Value::I64(-1)]))
        .unwrap()
        .with(2, Value::Map(tags))
        .unwrap();
    DynamicStruct::new(newer_desc())
        .with(1, 42i32)
        .unwrap()
        .with(5, "forward")
        .unwrap()
        .with(9, inner)
        .unwrap()
}

fn encode(codec: &mut dyn WireCodec) {
    newer_record().write(codec).unwrap();
    codec.write_i32(MARKER).unwrap();
}

fn decode_older(codec: &mut dyn WireCodec) {
    let mut old = DynamicStruct::new(older_desc());
    old.read(codec).unwrap();
    assert_eq!(old.get(1), Some(&Value::I32(42)));
    assert_eq!(codec.read_i32().unwrap(), MARKER);
}

#[test]
fn older_reader_skips_newer_fields_binary() {
    let mut w = BinaryCodec::new(MemoryBuffer::new());
    encode(&mut w);
    let mut r = BinaryCodec::new(MemoryInput::new(w.into_inner().take()));
    decode_older(&mut r);
}

#[test]
fn older_reader_skips_newer_fields_compact() {
    let mut w = CompactCodec::new(MemoryBuffer::new());
    encode(&mut w);
    let mut r = CompactCodec::new(MemoryInput::new(w.into_inner().take()));
    decode_older(&mut r);
}

#[test]
fn older_reader_skips_newer_fields_json() {
    let mut w = JsonCodec::new(MemoryBuffer::new());
    encode(&mut w);
    let mut r = JsonCodec::new(MemoryInput::new(w.into_inner().take()));
    decode_older(&mut r);
}

#[test]
fn skip_depth_is_bounded() {
    let mut w = CompactCodec::new(MemoryBuffer::new());
    newer_record().write(&mut w).unwrap();
    let mut r = CompactCodec::new(MemoryInput::new(w.into_inner().take()));
    let err = skip_with_depth(&mut r, TType::Struct, 2).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_DEPTH_LIMIT");
}

#[test]
fn read_depth_follows_the_transport_configuration() {
    let shallow = Configuration::builder().recursion_limit(1).build().unwrap();
    let mut w = BinaryCodec::new(MemoryBuffer::new());
    newer_record().write(&mut w).unwrap();
    let mut r = BinaryCodec::new(MemoryInput::with_config(shallow, w.into_inner().take()));

    let mut rec = DynamicStruct::new(newer_desc());
    let err = rec.read(&mut r).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_DEPTH_LIMIT");
}

#[test]
fn skipping_stop_is_invalid() {
    let mut r = BinaryCodec::new(MemoryInput::new(vec![0u8; 4]));
    let err = skip_with_depth(&mut r, TType::Stop, 8).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_INVALID_DATA");
}
