#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use wirecall_core::error::{Result, TransportErrorKind, WireError};
use wirecall_core::model::{
    ApplicationErrorKind, ApplicationException, DynamicStruct, FieldType, StructDescriptor, Value,
    WireStruct,
};
use wirecall_core::protocol::{MessageHeader, MessageType, ProtocolKind};

use wirecall_runtime::async_call::NonblockingChannel;
use wirecall_runtime::dispatch::{FnHandler, HandlerError, Processor};
use wirecall_runtime::services;
use wirecall_runtime::transport::CodecSpec;

pub fn binary() -> CodecSpec {
    CodecSpec::new(ProtocolKind::Binary)
}

pub fn add_args() -> Arc<StructDescriptor> {
    StructDescriptor::new("add_args")
        .required(1, "a", FieldType::I32)
        .required(2, "b", FieldType::I32)
        .build()
}

pub fn add_result() -> Arc<StructDescriptor> {
    StructDescriptor::new("add_result")
        .optional(0, "success", FieldType::I32)
        .build()
}

pub fn empty_args(name: &str) -> Arc<StructDescriptor> {
    StructDescriptor::new(name).build()
}

pub fn add(a: i32, b: i32) -> DynamicStruct {
    DynamicStruct::new(add_args())
        .with(1, a)
        .unwrap()
        .with(2, b)
        .unwrap()
}

/// Processor with the built-in services plus:
/// - `add`: sums two i32s
/// - `explode`: fails with an unexpected error
/// - `refuse`: raises an application exception
/// - `stall`: never finishes within a test
pub fn test_processor(spec: CodecSpec) -> Processor {
    let p = Processor::new(spec);
    services::register_builtin(&p);

    p.register(Arc::new(FnHandler::new("add", add_args(), |args: DynamicStruct| async move {
        let a = args.get(1).and_then(Value::as_i32).unwrap_or(0);
        let b = args.get(2).and_then(Value::as_i32).unwrap_or(0);
        let result = DynamicStruct::new(add_result()).with(0, a.wrapping_add(b))?;
        Ok::<_, HandlerError>(result)
    })));
    p.register(Arc::new(FnHandler::new("explode", empty_args("explode_args"), |_| async {
        Err::<DynamicStruct, _>(HandlerError::Internal("boom".into()))
    })));
    p.register(Arc::new(FnHandler::new("refuse", empty_args("refuse_args"), |_| async {
        Err::<DynamicStruct, _>(HandlerError::Application(ApplicationException::new(
            ApplicationErrorKind::Unknown,
            "refused",
        )))
    })));
    p.register(Arc::new(FnHandler::new("stall", empty_args("stall_args"), |_| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, HandlerError>(DynamicStruct::new(empty_args("stall_result")))
    })));
    p
}

pub fn encode_request(
    spec: &CodecSpec,
    method: &str,
    message_type: MessageType,
    seq_id: i32,
    args: &dyn WireStruct,
) -> Bytes {
    spec.encode(|codec| {
        codec.write_message_begin(&MessageHeader::new(method, message_type, seq_id))?;
        args.write(codec)?;
        codec.write_message_end()
    })
    .unwrap()
}

/// Decoded reply: the header plus either the exception or the result.
pub fn decode_reply(
    spec: &CodecSpec,
    reply: Bytes,
    result: Arc<StructDescriptor>,
) -> (MessageHeader, std::result::Result<DynamicStruct, ApplicationException>) {
    spec.decode(reply, |codec| {
        let header = codec.read_message_begin()?;
        let body = if header.message_type == MessageType::Exception {
            Err(ApplicationException::read_from(codec)?)
        } else {
            let mut s = DynamicStruct::new(result);
            s.read(codec)?;
            Ok(s)
        };
        codec.read_message_end()?;
        Ok((header, body))
    })
    .unwrap()
}

// --------------------
// In-memory channel
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Connect,
    Write(usize),
    Read(usize),
    Close,
}

/// Channel that hands each request to a processor and queues the framed
/// reply for the next reads.
pub struct MockChannel {
    processor: Arc<Processor>,
    ops: Arc<Mutex<Vec<Op>>>,
    stall_reads: Arc<AtomicBool>,
    awaiting_body: bool,
    inbox: BytesMut,
    open: bool,
}

impl MockChannel {
    pub fn new(processor: Arc<Processor>) -> Self {
        Self {
            processor,
            ops: Arc::new(Mutex::new(Vec::new())),
            stall_reads: Arc::new(AtomicBool::new(false)),
            awaiting_body: false,
            inbox: BytesMut::new(),
            open: false,
        }
    }

    pub fn ops(&self) -> Arc<Mutex<Vec<Op>>> {
        Arc::clone(&self.ops)
    }

    /// While set, reads never complete.
    pub fn stall_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stall_reads)
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl NonblockingChannel for MockChannel {
    async fn connect(&mut self) -> Result<()> {
        if !self.open {
            self.record(Op::Connect);
            self.open = true;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.record(Op::Write(buf.len()));
        if !self.awaiting_body {
            assert_eq!(buf.len(), 4, "frame size comes first");
            self.awaiting_body = true;
            return Ok(());
        }
        self.awaiting_body = false;
        let outcome = self.processor.process(Bytes::copy_from_slice(buf)).await?;
        if let Some(reply) = outcome.reply {
            self.inbox.put_i32(reply.len() as i32);
            self.inbox.put_slice(&reply);
        }
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.stall_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.record(Op::Read(buf.len()));
        if self.inbox.len() < buf.len() {
            return Err(WireError::transport(
                TransportErrorKind::EndOfFile,
                "mock channel has no reply",
            ));
        }
        buf.copy_from_slice(&self.inbox.split_to(buf.len()));
        Ok(())
    }

    async fn close(&mut self) {
        self.record(Op::Close);
        self.open = false;
        self.awaiting_body = false;
        self.inbox.clear();
    }
}

pub fn empty_args_value(name: &str) -> DynamicStruct {
    DynamicStruct::new(empty_args(name))
}
