//! Async call engine: many clients on one manager, timeouts, sticky errors,
//! busy rejection, stop, and a real TCP round trip.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use wirecall_core::error::{ErrorCode, TransportErrorKind};
use wirecall_core::model::{DynamicStruct, Value};
use wirecall_core::protocol::ProtocolKind;
use wirecall_runtime::async_call::{AsyncClient, ClientManager, TcpChannel};
use wirecall_runtime::config::{self, TransportMode};
use wirecall_runtime::services::{echo_args, PING};
use wirecall_runtime::transport::{CodecSpec, Server};

use common::{add, add_result, binary, test_processor, MockChannel, Op};

const WAIT: Duration = Duration::from_secs(5);

fn sum_of(result: &DynamicStruct) -> i32 {
    result.get(0).and_then(Value::as_i32).unwrap()
}

#[tokio::test]
async fn many_clients_complete_exactly_once() {
    let processor = Arc::new(test_processor(binary()));
    let manager = ClientManager::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut clients = Vec::new();
    for i in 0..64i32 {
        let channel = MockChannel::new(Arc::clone(&processor));
        let ops = channel.ops();
        let client = AsyncClient::new(&manager, binary(), Box::new(channel));
        let tx = tx.clone();
        client
            .call("add", &add(i, 1000), DynamicStruct::new(add_result()), move |res| {
                tx.send((i, res)).unwrap();
            })
            .unwrap();
        clients.push((client, ops));
    }
    drop(tx);

    let mut seen = vec![0u32; 64];
    while let Some((i, res)) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap() {
        assert_eq!(sum_of(&res.unwrap()), i + 1000);
        seen[i as usize] += 1;
    }
    assert!(seen.iter().all(|&n| n == 1), "{seen:?}");

    for (client, ops) in &clients {
        assert!(!client.is_busy());
        assert!(!client.has_error());
        let ops = ops.lock().unwrap();
        assert!(
            matches!(
                ops.as_slice(),
                [Op::Connect, Op::Write(4), Op::Write(_), Op::Read(4), Op::Read(_)]
            ),
            "{ops:?}"
        );
    }
    assert_eq!(
        manager.metrics().async_calls.get(&[("outcome", "complete")]),
        64
    );
}

#[tokio::test]
async fn oneway_completes_once_the_request_is_written() {
    let processor = Arc::new(test_processor(binary()));
    let manager = ClientManager::new().unwrap();
    let channel = MockChannel::new(processor);
    let ops = channel.ops();
    let client = AsyncClient::new(&manager, binary(), Box::new(channel));

    let args = DynamicStruct::new(echo_args()).with(1, "fire").unwrap();
    tokio::time::timeout(WAIT, client.request_oneway(PING, &args))
        .await
        .unwrap()
        .unwrap();

    let ops = ops.lock().unwrap();
    assert!(
        matches!(ops.as_slice(), [Op::Connect, Op::Write(4), Op::Write(_)]),
        "{ops:?}"
    );
    assert!(!client.is_busy());
}

#[tokio::test]
async fn timeout_sticks_until_cleared() {
    let processor = Arc::new(test_processor(binary()));
    let manager = ClientManager::new().unwrap();
    let channel = MockChannel::new(processor);
    let stall = channel.stall_switch();
    let ops = channel.ops();
    let client = AsyncClient::new(&manager, binary(), Box::new(channel))
        .with_timeout(Some(Duration::from_millis(50)));

    stall.store(true, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .call("add", &add(1, 2), DynamicStruct::new(add_result()), move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    let err = tokio::time::timeout(WAIT, rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Transport(TransportErrorKind::TimedOut));
    assert!(err.to_string().contains("READING_RESPONSE_SIZE"), "{err}");
    assert!(rx.recv().await.is_none(), "callback fired twice");

    assert!(client.has_error());
    assert_eq!(
        client.error().unwrap().code,
        ErrorCode::Transport(TransportErrorKind::TimedOut)
    );
    assert!(!client.is_busy());

    let refused = client
        .call("add", &add(1, 2), DynamicStruct::new(add_result()), |_| {
            panic!("refused calls never complete")
        })
        .unwrap_err();
    assert_eq!(refused.code(), ErrorCode::IllegalState);

    client.clear_error();
    stall.store(false, Ordering::SeqCst);
    let result = tokio::time::timeout(
        WAIT,
        client.request("add", &add(1, 2), DynamicStruct::new(add_result())),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(sum_of(&result), 3);

    // The timed-out call's channel was closed and reopened.
    let ops = ops.lock().unwrap();
    assert!(ops.contains(&Op::Close), "{ops:?}");
    assert_eq!(ops.iter().filter(|op| **op == Op::Connect).count(), 2);
    assert_eq!(
        manager.metrics().async_calls.get(&[("outcome", "timeout")]),
        1
    );
}

#[tokio::test]
async fn busy_client_rejects_a_second_call() {
    let processor = Arc::new(test_processor(binary()));
    let manager = ClientManager::new().unwrap();
    let channel = MockChannel::new(processor);
    channel.stall_switch().store(true, Ordering::SeqCst);
    let client = AsyncClient::new(&manager, binary(), Box::new(channel));

    let first = client.request("add", &add(1, 1), DynamicStruct::new(add_result()));
    assert!(client.is_busy());

    let err = client
        .request("add", &add(2, 2), DynamicStruct::new(add_result()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IllegalState);
    assert!(err.to_string().contains("currently executing"), "{err}");

    manager.stop();
    let err = tokio::time::timeout(WAIT, first).await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::IllegalState);
}

#[tokio::test]
async fn stopped_manager_rejects_new_calls() {
    let processor = Arc::new(test_processor(binary()));
    let manager = ClientManager::new().unwrap();
    assert!(manager.is_running());
    manager.stop();
    assert!(!manager.is_running());

    let client = AsyncClient::new(&manager, binary(), Box::new(MockChannel::new(processor)));
    let err = client
        .request("add", &add(1, 1), DynamicStruct::new(add_result()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IllegalState);
    assert!(!client.is_busy());
    assert!(!client.has_error());
}

#[tokio::test]
async fn oversized_request_is_refused_before_submission() {
    let processor = Arc::new(test_processor(binary()));
    let manager = ClientManager::new().unwrap();
    let spec = binary().with_config(
        wirecall_core::config::Configuration::builder()
            .max_frame_size(16)
            .build()
            .unwrap(),
    );
    let client = AsyncClient::new(&manager, spec, Box::new(MockChannel::new(processor)));
    let err = client
        .request("add", &add(1, 1), DynamicStruct::new(add_result()))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL_SIZE_LIMIT");
    assert!(!client.is_busy());
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_channel_against_a_framed_server() {
    let spec = CodecSpec::new(ProtocolKind::Compact);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(Arc::new(test_processor(spec)), TransportMode::Framed);
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.serve(listener));

    let cfg = config::load_from_str("version: 1\nclient:\n  timeout_ms: 5000\n").unwrap();
    let manager = ClientManager::new().unwrap();
    let client = AsyncClient::new(&manager, spec, Box::new(TcpChannel::new(addr.to_string())))
        .with_timeout(cfg.client.timeout());
    assert_eq!(client.timeout(), Some(WAIT));

    for i in 0..5 {
        let result = client
            .request("add", &add(i, i), DynamicStruct::new(add_result()))
            .await
            .unwrap();
        assert_eq!(sum_of(&result), 2 * i);
    }

    let err = client
        .request("refuse", &common::empty_args_value("refuse_args"), DynamicStruct::new(add_result()))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "APPLICATION_UNKNOWN");
    assert!(!client.has_error(), "application errors leave the client usable");

    let result = client
        .request("add", &add(20, 22), DynamicStruct::new(add_result()))
        .await
        .unwrap();
    assert_eq!(sum_of(&result), 42);

    manager.stop();
    shutdown.shutdown();
}
