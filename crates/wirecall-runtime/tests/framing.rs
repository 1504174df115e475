//! Message boundaries in unframed streams and nesting limits on requests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use bytes::{Bytes, BytesMut};

use wirecall_core::config::Configuration;
use wirecall_core::protocol::{MessageHeader, MessageType, ProtocolKind};
use wirecall_core::transport::Transport;
use wirecall_runtime::transport::CodecSpec;

use common::{add, binary, encode_request, test_processor};

/// A call header followed by `levels` nested struct fields and their stops.
fn deep_request(spec: &CodecSpec, method: &str, levels: usize) -> Bytes {
    let mut body = Vec::new();
    for _ in 0..levels {
        body.extend_from_slice(&[0x0c, 0x00, 0x01]);
    }
    body.extend(std::iter::repeat(0x00).take(levels + 1));
    spec.encode(|codec| {
        codec.write_message_begin(&MessageHeader::new(method, MessageType::Call, 1))?;
        codec.transport().write(&body)?;
        codec.write_message_end()
    })
    .unwrap()
}

// ----------------------------------------------------------------------------
// message_len
// ----------------------------------------------------------------------------

#[test]
fn complete_message_length_is_reported() {
    let spec = binary();
    let request = encode_request(&spec, "add", MessageType::Call, 1, &add(1, 2));
    assert_eq!(spec.message_len(request.clone()).unwrap(), Some(request.len()));
}

#[test]
fn partial_message_needs_more_bytes() {
    let spec = CodecSpec::new(ProtocolKind::Compact);
    let request = encode_request(&spec, "add", MessageType::Call, 1, &add(1, 2));
    assert_eq!(spec.message_len(Bytes::new()).unwrap(), None);
    for cut in 1..request.len() {
        assert_eq!(spec.message_len(request.slice(..cut)).unwrap(), None, "cut at {cut}");
    }
}

#[test]
fn trailing_bytes_belong_to_the_next_message() {
    let spec = binary();
    let first = encode_request(&spec, "add", MessageType::Call, 1, &add(1, 2));
    let second = encode_request(&spec, "add", MessageType::Call, 2, &add(3, 4));
    let mut both = BytesMut::new();
    both.extend_from_slice(&first);
    both.extend_from_slice(&second[..5]);
    assert_eq!(spec.message_len(both.freeze()).unwrap(), Some(first.len()));
}

#[test]
fn deep_nesting_is_a_depth_error_not_a_partial_message() {
    let spec = binary();
    let err = spec.message_len(deep_request(&spec, "add", 500)).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_DEPTH_LIMIT");

    let shallow = deep_request(&spec, "add", 8);
    assert_eq!(spec.message_len(shallow.clone()).unwrap(), Some(shallow.len()));
}

#[test]
fn nesting_limit_follows_the_codec_configuration() {
    let spec = binary().with_config(Configuration::builder().recursion_limit(4).build().unwrap());
    let err = spec.message_len(deep_request(&spec, "add", 6)).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_DEPTH_LIMIT");
}

// ----------------------------------------------------------------------------
// Processor
// ----------------------------------------------------------------------------

#[tokio::test]
async fn deeply_nested_unknown_method_fails_the_connection() {
    let spec = binary();
    let processor = test_processor(spec);

    let err = processor
        .process(deep_request(&spec, "nope", 500))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_DEPTH_LIMIT");
    assert_eq!(
        processor
            .metrics()
            .processor_errors
            .get(&[("code", "PROTOCOL_DEPTH_LIMIT")]),
        1
    );
}

#[tokio::test]
async fn moderately_nested_unknown_method_is_still_rejected_politely() {
    let spec = binary();
    let processor = test_processor(spec);

    let outcome = processor.process(deep_request(&spec, "nope", 8)).await.unwrap();
    assert!(!outcome.close);
    assert!(outcome.reply.is_some());
}
