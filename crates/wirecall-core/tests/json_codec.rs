//! JSON codec: layout, escaping, special doubles, base64.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;

use wirecall_core::model::{DynamicStruct, FieldType, StructDescriptor, Value, WireStruct};
use wirecall_core::protocol::{JsonCodec, WireCodec};
use wirecall_core::transport::{MemoryBuffer, MemoryInput};

fn sample_desc() -> Arc<StructDescriptor> {
    StructDescriptor::new("Sample")
        .optional(1, "text", FieldType::String)
        .optional(2, "ratio", FieldType::Double)
        .optional(3, "blob", FieldType::Binary)
        .optional(4, "names", FieldType::map(FieldType::I32, FieldType::String))
        .optional(5, "flags", FieldType::list(FieldType::Bool))
        .build()
}

fn to_json(s: &DynamicStruct, field_names: bool) -> String {
    let mut codec = JsonCodec::new(MemoryBuffer::new()).with_field_names(field_names);
    s.write(&mut codec).unwrap();
    String::from_utf8(codec.get_ref().as_slice().to_vec()).unwrap()
}

fn from_json(desc: Arc<StructDescriptor>, text: &str) -> wirecall_core::Result<DynamicStruct> {
    let mut s = DynamicStruct::new(desc);
    s.read(&mut JsonCodec::new(MemoryInput::new(text.as_bytes().to_vec())))?;
    Ok(s)
}

#[test]
fn struct_layout_and_escapes() {
    let mut names = BTreeMap::new();
    names.insert(Value::I32(1), Value::from("x"));
    let s = DynamicStruct::new(sample_desc())
        .with(1, "a\"b\\c\n\u{1}")
        .unwrap()
        .with(2, f64::NAN)
        .unwrap()
        .with(3, vec![1u8, 2, 3])
        .unwrap()
        .with(4, Value::Map(names))
        .unwrap()
        .with(5, Value::List(vec![Value::Bool(true)]))
        .unwrap();

    let text = to_json(&s, false);
    assert_eq!(
        text,
        r#"{"1":{"str":"a\"b\\c\n\u0001"},"2":{"dbl":"NaN"},"3":{"str":"AQID"},"4":{"map":["i32","str",1,{"1":"x"}]},"5":{"lst":["tf",1,1]}}"#
    );

    let mut back = from_json(sample_desc(), &text).unwrap();
    match back.get(2) {
        Some(Value::Double(v)) => assert!(v.is_nan()),
        other => panic!("unexpected ratio: {other:?}"),
    }
    let mut expected = s.clone();
    back.unset(2).unwrap();
    expected.unset(2).unwrap();
    assert_eq!(back.compare(&expected), std::cmp::Ordering::Equal);
}

#[test]
fn field_names_mode_keys_by_name() {
    let s = DynamicStruct::new(sample_desc()).with(1, "x").unwrap();
    assert_eq!(to_json(&s, true), r#"{"text":{"str":"x"}}"#);
}

#[test]
fn infinity_is_quoted() {
    let s = DynamicStruct::new(sample_desc())
        .with(2, f64::NEG_INFINITY)
        .unwrap();
    assert_eq!(to_json(&s, false), r#"{"2":{"dbl":"-Infinity"}}"#);
}

#[test]
fn quoted_finite_double_is_rejected() {
    let err = from_json(sample_desc(), r#"{"2":{"dbl":"1.5"}}"#).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_INVALID_DATA");
}

#[test]
fn surrogate_pairs_decode_to_one_char() {
    let s = from_json(sample_desc(), r#"{"1":{"str":"\ud83d\ude00 \u00e9\/"}}"#).unwrap();
    assert_eq!(s.get(1), Some(&Value::from("\u{1F600} \u{e9}/")));
}

#[test]
fn lone_surrogates_are_rejected() {
    for text in [
        r#"{"1":{"str":"\ude00"}}"#,
        r#"{"1":{"str":"\ud83d"}}"#,
        r#"{"1":{"str":"\ud83dx"}}"#,
    ] {
        let err = from_json(sample_desc(), text).unwrap_err();
        assert_eq!(err.code().as_str(), "PROTOCOL_INVALID_DATA", "input={text}");
    }
}

#[test]
fn base64_accepts_padding_and_missing_padding() {
    for (text, want) in [
        (r#""AQID""#, vec![1u8, 2, 3]),
        (r#""AQI=""#, vec![1u8, 2]),
        (r#""AQI""#, vec![1u8, 2]),
        (r#""AQ==""#, vec![1u8]),
    ] {
        let mut codec = JsonCodec::new(MemoryInput::new(text.as_bytes().to_vec()));
        assert_eq!(codec.read_binary().unwrap(), want, "input={text}");
    }
}

#[test]
fn non_ascii_passes_through_unescaped() {
    let s = DynamicStruct::new(sample_desc()).with(1, "h\u{e9}").unwrap();
    assert_eq!(to_json(&s, false), "{\"1\":{\"str\":\"h\u{e9}\"}}");
}

#[test]
fn unknown_json_fields_are_skipped() {
    let desc = StructDescriptor::new("Small")
        .optional(1, "text", FieldType::String)
        .build();
    let text = r#"{"1":{"str":"keep"},"7":{"lst":["rec",1,{"1":{"i64":9}}]},"8":{"str":"plain, not base64"}}"#;
    let s = from_json(desc, text).unwrap();
    assert_eq!(s.get(1), Some(&Value::from("keep")));
}
