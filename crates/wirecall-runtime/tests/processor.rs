//! Request dispatch: replies, exceptions and connection disposition.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use bytes::Bytes;

use wirecall_core::model::{ApplicationErrorKind, DynamicStruct, Value};
use wirecall_core::protocol::{MessageType, ProtocolKind};
use wirecall_runtime::dispatch::ProcessorOptions;
use wirecall_runtime::transport::CodecSpec;

use common::{add, add_result, binary, decode_reply, empty_args, encode_request, test_processor};

#[tokio::test]
async fn call_is_answered_with_a_reply() {
    let spec = binary();
    let processor = test_processor(spec);
    let request = encode_request(&spec, "add", MessageType::Call, 7, &add(2, 3));

    let outcome = processor.process(request).await.unwrap();
    assert!(!outcome.close);
    let (header, body) = decode_reply(&spec, outcome.reply.unwrap(), add_result());
    assert_eq!(header.message_type, MessageType::Reply);
    assert_eq!(header.seq_id, 7);
    assert_eq!(header.name, "add");
    assert_eq!(body.unwrap().get(0), Some(&Value::I32(5)));

    let metrics = processor.metrics();
    assert_eq!(metrics.requests.get(&[("method", "add"), ("outcome", "reply")]), 1);
    assert_eq!(metrics.dispatch_duration.count(&[("method", "add")]), 1);
}

#[tokio::test]
async fn unknown_method_gets_an_exception_with_the_same_seq_id() {
    let spec = CodecSpec::new(ProtocolKind::Compact);
    let processor = test_processor(spec);
    let request = encode_request(&spec, "nope", MessageType::Call, 41, &add(1, 1));

    let outcome = processor.process(request).await.unwrap();
    assert!(!outcome.close);
    let (header, body) = decode_reply(&spec, outcome.reply.unwrap(), add_result());
    assert_eq!(header.message_type, MessageType::Exception);
    assert_eq!(header.seq_id, 41);
    let ex = body.unwrap_err();
    assert_eq!(ex.kind, ApplicationErrorKind::UnknownMethod);
    assert_eq!(ex.message, "Invalid method name: 'nope'");
}

#[tokio::test]
async fn undecodable_arguments_reply_protocol_error_and_close() {
    let spec = binary();
    let processor = test_processor(spec);
    // `add` without its required second argument.
    let partial = DynamicStruct::new(common::add_result()).with(0, 1i32).unwrap();
    let request = encode_request(&spec, "add", MessageType::Call, 3, &partial);

    let outcome = processor.process(request).await.unwrap();
    assert!(outcome.protocol_error);
    assert!(outcome.close);
    let (header, body) = decode_reply(&spec, outcome.reply.unwrap(), add_result());
    assert_eq!(header.message_type, MessageType::Exception);
    assert_eq!(body.unwrap_err().kind, ApplicationErrorKind::ProtocolError);
}

#[tokio::test]
async fn protocol_error_can_keep_the_connection() {
    let spec = binary();
    let processor = test_processor(spec).with_options(ProcessorOptions {
        close_on_protocol_error: false,
        rethrow_unhandled: false,
    });
    let partial = DynamicStruct::new(empty_args("add_args"));
    let request = encode_request(&spec, "add", MessageType::Call, 3, &partial);

    let outcome = processor.process(request).await.unwrap();
    assert!(outcome.protocol_error);
    assert!(!outcome.close);
}

#[tokio::test]
async fn unexpected_failure_is_internal_error() {
    let spec = binary();
    let processor = test_processor(spec);
    let request = encode_request(&spec, "explode", MessageType::Call, 9, &DynamicStruct::new(empty_args("explode_args")));

    let outcome = processor.process(request).await.unwrap();
    let (header, body) = decode_reply(&spec, outcome.reply.unwrap(), add_result());
    assert_eq!(header.message_type, MessageType::Exception);
    let ex = body.unwrap_err();
    assert_eq!(ex.kind, ApplicationErrorKind::InternalError);
    assert_eq!(ex.message, "Internal error processing explode");
}

#[tokio::test]
async fn unexpected_failure_can_be_rethrown() {
    let spec = binary();
    let processor = test_processor(spec).with_options(ProcessorOptions {
        close_on_protocol_error: true,
        rethrow_unhandled: true,
    });
    let request = encode_request(&spec, "explode", MessageType::Call, 9, &DynamicStruct::new(empty_args("explode_args")));

    let err = processor.process(request).await.unwrap_err();
    assert_eq!(err.code().as_str(), "APPLICATION_INTERNAL_ERROR");
}

#[tokio::test]
async fn application_exception_is_sent_back() {
    let spec = CodecSpec::new(ProtocolKind::Json);
    let processor = test_processor(spec);
    let request = encode_request(&spec, "refuse", MessageType::Call, 5, &DynamicStruct::new(empty_args("refuse_args")));

    let outcome = processor.process(request).await.unwrap();
    let (header, body) = decode_reply(&spec, outcome.reply.unwrap(), add_result());
    assert_eq!(header.message_type, MessageType::Exception);
    assert_eq!(body.unwrap_err().message, "refused");
}

#[tokio::test]
async fn oneway_calls_produce_no_reply() {
    let spec = binary();
    let processor = test_processor(spec);

    let request = encode_request(&spec, "ping", MessageType::Oneway, 1, &DynamicStruct::new(empty_args("ping_args")));
    let outcome = processor.process(request).await.unwrap();
    assert!(outcome.reply.is_none());

    // A failing handler invoked oneway stays silent too.
    let request = encode_request(&spec, "explode", MessageType::Oneway, 2, &DynamicStruct::new(empty_args("explode_args")));
    let outcome = processor.process(request).await.unwrap();
    assert!(outcome.reply.is_none());
}

#[tokio::test]
async fn broken_header_is_an_error() {
    let processor = test_processor(binary());
    let err = processor
        .process(Bytes::from_static(&[0x80, 0x02, 0x00, 0x01]))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_BAD_VERSION");
}

#[tokio::test]
async fn reply_message_type_is_rejected() {
    let spec = binary();
    let processor = test_processor(spec);
    let request = encode_request(&spec, "add", MessageType::Reply, 4, &add(1, 2));

    let outcome = processor.process(request).await.unwrap();
    let (_, body) = decode_reply(&spec, outcome.reply.unwrap(), add_result());
    assert_eq!(body.unwrap_err().kind, ApplicationErrorKind::InvalidMessageType);
}

#[test]
fn registry_lists_methods() {
    let processor = test_processor(binary());
    let mut methods = processor.registered_methods();
    methods.sort();
    assert_eq!(methods, ["add", "echo", "explode", "ping", "refuse", "stall"]);
}
