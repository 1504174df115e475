//! Hostile sizes, counts, and nesting fail with typed errors, never by
//! exhausting memory or stack.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use wirecall_core::config::{CodecLimits, Configuration};
use wirecall_core::model::{DynamicStruct, FieldType, StructDescriptor, WireStruct};
use wirecall_core::protocol::{
    skip, BinaryCodec, CompactCodec, JsonCodec, MessageHeader, MessageType, TType, WireCodec,
};
use wirecall_core::transport::{MemoryBuffer, MemoryInput, Transport};

fn holder_desc() -> Arc<StructDescriptor> {
    let empty = StructDescriptor::new("Empty").build();
    StructDescriptor::new("Holder")
        .optional(1, "items", FieldType::list(FieldType::Struct(empty)))
        .build()
}

fn code_of(err: wirecall_core::WireError) -> &'static str {
    err.code().as_str()
}

// ----------------------------------------------------------------------------
// Counts
// ----------------------------------------------------------------------------

#[test]
fn huge_list_count_in_a_tiny_message_is_rejected() {
    // {1: list<struct> of i32::MAX elements} in nine bytes.
    let raw = hex::decode("0f00010c7fffffff00").unwrap();
    let mut s = DynamicStruct::new(holder_desc());
    let err = s.read(&mut BinaryCodec::new(MemoryInput::new(raw))).unwrap_err();
    assert_eq!(code_of(err), "TRANSPORT_END_OF_FILE");
}

#[test]
fn count_within_a_large_budget_does_not_reserve_up_front() {
    // 2^28 structs against a 2 GiB budget; only the first element is
    // actually present.
    let config = Configuration::builder()
        .max_message_size(i32::MAX as usize)
        .build()
        .unwrap();
    let mut buf = MemoryBuffer::with_config(config);
    buf.write(&hex::decode("0f00010c1000000000").unwrap()).unwrap();

    let mut s = DynamicStruct::new(holder_desc());
    let err = s.read(&mut BinaryCodec::new(buf)).unwrap_err();
    assert_eq!(code_of(err), "TRANSPORT_END_OF_FILE");
}

#[test]
fn negative_list_count_is_rejected() {
    let raw = hex::decode("0f00010cffffffff00").unwrap();
    let mut s = DynamicStruct::new(holder_desc());
    let err = s.read(&mut BinaryCodec::new(MemoryInput::new(raw))).unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_NEGATIVE_SIZE");
}

#[test]
fn positional_list_count_honors_container_limit() {
    let desc = StructDescriptor::new("Row")
        .required(1, "items", FieldType::list(FieldType::I32))
        .build();
    let limits = CodecLimits::new(None, Some(4));

    // Count 2, elements 1 and 2 (zigzag varints).
    let mut ok = DynamicStruct::new(Arc::clone(&desc));
    ok.read(
        &mut CompactCodec::positional(MemoryInput::new(vec![0x04, 0x02, 0x04]))
            .with_limits(limits),
    )
    .unwrap();

    // Count 10.
    let mut s = DynamicStruct::new(desc);
    let err = s
        .read(&mut CompactCodec::positional(MemoryInput::new(vec![0x14])).with_limits(limits))
        .unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_SIZE_LIMIT");
}

#[test]
fn positional_negative_count_is_rejected() {
    let desc = StructDescriptor::new("Row")
        .required(1, "items", FieldType::set(FieldType::I16))
        .build();
    // zigzag(-1)
    let mut s = DynamicStruct::new(desc);
    let err = s
        .read(&mut CompactCodec::positional(MemoryInput::new(vec![0x01])))
        .unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_NEGATIVE_SIZE");
}

// ----------------------------------------------------------------------------
// Nesting
// ----------------------------------------------------------------------------

fn nested_struct_fields(levels: usize) -> Vec<u8> {
    let mut raw = Vec::new();
    for _ in 0..levels {
        raw.extend_from_slice(&[0x0c, 0x00, 0x01]);
    }
    raw.extend(std::iter::repeat(0x00).take(levels + 1));
    raw
}

#[test]
fn skip_stops_at_the_configured_recursion_limit() {
    let mut codec = BinaryCodec::new(MemoryInput::new(nested_struct_fields(200)));
    let err = skip(&mut codec, TType::Struct).unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_DEPTH_LIMIT");
}

#[test]
fn skip_passes_nesting_under_the_limit() {
    let mut codec = BinaryCodec::new(MemoryInput::new(nested_struct_fields(10)));
    skip(&mut codec, TType::Struct).unwrap();
    assert_eq!(codec.get_ref().remaining(), 0);
}

#[test]
fn skip_follows_a_lowered_recursion_limit() {
    let config = Configuration::builder().recursion_limit(4).build().unwrap();
    let mut codec = CompactCodec::new(MemoryInput::with_config(
        config,
        // Five nested lists of lists, each with one element.
        hex::decode("19191919191500").unwrap(),
    ));
    let err = skip(&mut codec, TType::List).unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_DEPTH_LIMIT");
}

// ----------------------------------------------------------------------------
// JSON
// ----------------------------------------------------------------------------

#[test]
fn json_string_over_limit_is_size_limit() {
    let desc = StructDescriptor::new("Note")
        .optional(1, "text", FieldType::String)
        .build();
    let text = br#"{"1":{"str":"abcdefghij"}}"#.to_vec();

    let mut s = DynamicStruct::new(Arc::clone(&desc));
    s.read(&mut JsonCodec::new(MemoryInput::new(text.clone()))).unwrap();

    let mut s = DynamicStruct::new(desc);
    let err = s
        .read(
            &mut JsonCodec::new(MemoryInput::new(text))
                .with_limits(CodecLimits::new(Some(4), None)),
        )
        .unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_SIZE_LIMIT");
}

#[test]
fn json_field_id_out_of_range_is_invalid() {
    let desc = StructDescriptor::new("Note")
        .optional(1, "n", FieldType::I32)
        .build();
    let mut s = DynamicStruct::new(desc);
    let err = s
        .read(&mut JsonCodec::new(MemoryInput::new(
            br#"{"40000":{"i32":1}}"#.to_vec(),
        )))
        .unwrap_err();
    assert_eq!(code_of(err), "PROTOCOL_INVALID_DATA");
}

#[test]
fn json_integers_must_fit_their_width() {
    let mut codec = JsonCodec::new(MemoryInput::new(b"300,".to_vec()));
    assert_eq!(code_of(codec.read_byte().unwrap_err()), "PROTOCOL_INVALID_DATA");

    let mut codec = JsonCodec::new(MemoryInput::new(b"70000,".to_vec()));
    assert_eq!(code_of(codec.read_i16().unwrap_err()), "PROTOCOL_INVALID_DATA");

    let mut codec = JsonCodec::new(MemoryInput::new(b"4294967296,".to_vec()));
    assert_eq!(code_of(codec.read_i32().unwrap_err()), "PROTOCOL_INVALID_DATA");

    let mut codec = JsonCodec::new(MemoryInput::new(b"-129,".to_vec()));
    assert_eq!(code_of(codec.read_byte().unwrap_err()), "PROTOCOL_INVALID_DATA");

    let mut codec = JsonCodec::new(MemoryInput::new(b"-128,".to_vec()));
    assert_eq!(codec.read_byte().unwrap(), -128);
}

#[test]
fn json_message_header_rejects_wide_type_and_sequence() {
    // Message type 257 would alias CALL if truncated to a byte.
    let mut codec = JsonCodec::new(MemoryInput::new(br#"[1,"ping",257,0]"#.to_vec()));
    assert_eq!(
        code_of(codec.read_message_begin().unwrap_err()),
        "PROTOCOL_INVALID_DATA"
    );

    let mut codec = JsonCodec::new(MemoryInput::new(br#"[1,"ping",1,4294967297]"#.to_vec()));
    assert_eq!(
        code_of(codec.read_message_begin().unwrap_err()),
        "PROTOCOL_INVALID_DATA"
    );
}

// ----------------------------------------------------------------------------
// Message budget
// ----------------------------------------------------------------------------

fn tick_desc() -> Arc<StructDescriptor> {
    StructDescriptor::new("Tick")
        .required(1, "n", FieldType::I32)
        .build()
}

#[test]
fn reused_buffer_restarts_its_budget_per_message() {
    // Each message is about 24 bytes; twenty of them would overrun a shared
    // 64 byte budget.
    let config = Configuration::builder()
        .max_message_size(64)
        .max_frame_size(64)
        .build()
        .unwrap();
    let mut codec = BinaryCodec::new(MemoryBuffer::with_config(config));

    for n in 0..20 {
        let header = MessageHeader::new("tick", MessageType::Oneway, n);
        codec.write_message_begin(&header).unwrap();
        DynamicStruct::new(tick_desc())
            .with(1, n)
            .unwrap()
            .write(&mut codec)
            .unwrap();
        codec.write_message_end().unwrap();

        assert_eq!(codec.read_message_begin().unwrap(), header);
        let mut back = DynamicStruct::new(tick_desc());
        back.read(&mut codec).unwrap();
        codec.read_message_end().unwrap();
        assert_eq!(back.get(1).and_then(|v| v.as_i32()), Some(n));
        assert!(codec.get_ref().is_empty());
    }
}

#[test]
fn budget_still_bounds_a_single_message() {
    let config = Configuration::builder()
        .max_message_size(16)
        .max_frame_size(16)
        .build()
        .unwrap();
    let mut codec = BinaryCodec::new(MemoryBuffer::with_config(config));
    codec.write_string(&"x".repeat(40)).unwrap();
    let err = codec.read_string().unwrap_err();
    assert_eq!(code_of(err), "TRANSPORT_END_OF_FILE");
}
