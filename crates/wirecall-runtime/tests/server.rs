//! TCP server: framed and buffered connections, lifecycle hooks, shutdown.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use tokio::net::TcpListener;

use wirecall_core::client::{success_value, ServiceClient};
use wirecall_core::model::{DynamicStruct, Value};
use wirecall_core::protocol::{BinaryCodec, CompactCodec, MessageType, ProtocolKind};
use wirecall_core::transport::{FramedTransport, SocketTransport, Transport};
use wirecall_runtime::config::TransportMode;
use wirecall_runtime::transport::{CodecSpec, Server, ServerEventHandler, ShutdownHandle};

use common::{add, add_result, decode_reply, encode_request, test_processor};

#[derive(Default)]
struct Counting {
    connects: AtomicUsize,
    requests: AtomicUsize,
    disconnects: AtomicUsize,
}

impl ServerEventHandler for Counting {
    fn on_connect(&self, _peer: SocketAddr) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }
    fn on_request(&self, _peer: SocketAddr) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
    fn on_disconnect(&self, _peer: SocketAddr) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

async fn start(
    spec: CodecSpec,
    mode: TransportMode,
    events: Arc<Counting>,
) -> (SocketAddr, ShutdownHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(Arc::new(test_processor(spec)), mode).with_events(events);
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.serve(listener));
    (addr, shutdown)
}

#[tokio::test(flavor = "multi_thread")]
async fn framed_binary_round_trips() {
    let events = Arc::new(Counting::default());
    let (addr, shutdown) = start(
        CodecSpec::new(ProtocolKind::Binary),
        TransportMode::Framed,
        Arc::clone(&events),
    )
    .await;

    let sums = tokio::task::spawn_blocking(move || {
        let mut socket = SocketTransport::new(addr.to_string());
        socket.open().unwrap();
        let mut client = ServiceClient::new(BinaryCodec::new(FramedTransport::new(socket)));
        (1..=3)
            .map(|i| {
                let mut result = DynamicStruct::new(add_result());
                client.call("add", &add(i, 10), &mut result).unwrap();
                success_value("add", &result).unwrap()
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    assert_eq!(sums, [Value::I32(11), Value::I32(12), Value::I32(13)]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.connects.load(Ordering::SeqCst), 1);
    assert_eq!(events.requests.load(Ordering::SeqCst), 3);
    assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn buffered_compact_round_trips() {
    let events = Arc::new(Counting::default());
    let (addr, shutdown) = start(
        CodecSpec::new(ProtocolKind::Compact),
        TransportMode::Buffered,
        Arc::clone(&events),
    )
    .await;

    let sum = tokio::task::spawn_blocking(move || {
        let mut socket = SocketTransport::new(addr.to_string());
        socket.open().unwrap();
        let mut client = ServiceClient::new(CompactCodec::new(socket));
        let mut result = DynamicStruct::new(add_result());
        client.call("add", &add(20, 22), &mut result).unwrap();
        let first = success_value("add", &result).unwrap();
        client.call("add", &add(-1, 1), &mut result).unwrap();
        (first, success_value("add", &result).unwrap())
    })
    .await
    .unwrap();

    assert_eq!(sum, (Value::I32(42), Value::I32(0)));
    shutdown.shutdown();
}

/// Read one reply off an unframed stream, using the codec to find its end.
fn read_unframed_reply(stream: &mut TcpStream, spec: &CodecSpec) -> Bytes {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before a full reply");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(len) = spec.message_len(Bytes::copy_from_slice(&buf)).unwrap() {
            return Bytes::copy_from_slice(&buf[..len]);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn buffered_request_split_across_writes_is_answered() {
    let events = Arc::new(Counting::default());
    let spec = CodecSpec::new(ProtocolKind::Binary);
    let (addr, shutdown) = start(spec, TransportMode::Buffered, Arc::clone(&events)).await;

    let reply = tokio::task::spawn_blocking(move || {
        let request = encode_request(&spec, "add", MessageType::Call, 9, &add(40, 2));
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.set_nodelay(true).unwrap();
        for piece in request.chunks(3) {
            stream.write_all(piece).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        read_unframed_reply(&mut stream, &spec)
    })
    .await
    .unwrap();

    let (header, body) = decode_reply(&spec, reply, add_result());
    assert_eq!(header.seq_id, 9);
    assert_eq!(body.unwrap().get(0), Some(&Value::I32(42)));
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn buffered_pipelined_requests_are_answered_in_order() {
    let events = Arc::new(Counting::default());
    let spec = CodecSpec::new(ProtocolKind::Compact);
    let (addr, shutdown) = start(spec, TransportMode::Buffered, Arc::clone(&events)).await;

    let replies = tokio::task::spawn_blocking(move || {
        let mut both = Vec::new();
        both.extend_from_slice(&encode_request(&spec, "add", MessageType::Call, 1, &add(1, 1)));
        both.extend_from_slice(&encode_request(&spec, "add", MessageType::Call, 2, &add(2, 2)));
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(&both).unwrap();

        let mut replies = Vec::new();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        while replies.len() < 2 {
            match spec.message_len(Bytes::copy_from_slice(&buf)).unwrap() {
                Some(len) => {
                    replies.push(Bytes::copy_from_slice(&buf[..len]));
                    buf.drain(..len);
                }
                None => {
                    let n = stream.read(&mut chunk).unwrap();
                    assert!(n > 0, "connection closed early");
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
        replies
    })
    .await
    .unwrap();

    let seqs: Vec<i32> = replies
        .into_iter()
        .map(|r| decode_reply(&spec, r, add_result()).0.seq_id)
        .collect();
    assert_eq!(seqs, [1, 2]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.requests.load(Ordering::SeqCst), 2);
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_frame_closes_the_connection() {
    let events = Arc::new(Counting::default());
    let spec = CodecSpec::new(ProtocolKind::Binary).with_config(
        wirecall_core::config::Configuration::builder()
            .max_frame_size(64)
            .build()
            .unwrap(),
    );
    let (addr, shutdown) = start(spec, TransportMode::Framed, Arc::clone(&events)).await;

    let read = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(&1000i32.to_be_bytes()).unwrap();
        let mut buf = [0u8; 1];
        stream.read(&mut buf).unwrap_or(0)
    })
    .await
    .unwrap();

    assert_eq!(read, 0, "server hangs up without a reply");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.requests.load(Ordering::SeqCst), 0);
    assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_accepting() {
    let events = Arc::new(Counting::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let processor = Arc::new(test_processor(CodecSpec::new(ProtocolKind::Binary)));
    let server = Server::new(Arc::clone(&processor), TransportMode::Framed).with_events(events);
    let shutdown = server.shutdown_handle();
    let serving = tokio::spawn(server.serve(listener));

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("serve returns after shutdown")
        .unwrap()
        .unwrap();
    assert!(shutdown.is_shutdown());
    assert!(processor.metrics().is_draining());
}
