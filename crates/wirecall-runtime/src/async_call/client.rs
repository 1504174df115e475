//! Async client: submits calls to a [`ClientManager`] and delivers results
//! through a callback or a future.
//!
//! A client owns one channel and runs at most one call at a time. A
//! transport or protocol failure sticks: the channel is closed and every
//! later call is refused until [`AsyncClient::clear_error`]. Application
//! exceptions sent by the server are returned to the caller but do not
//! stick, since the connection is still in sync.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use wirecall_core::error::{ErrorCode, ProtocolErrorKind, Result, TransportErrorKind, WireError};
use wirecall_core::model::{ApplicationErrorKind, ApplicationException, WireStruct};
use wirecall_core::protocol::{MessageHeader, MessageType};

use super::call::{next_seq_id, Completion, MethodCall};
use super::channel::NonblockingChannel;
use super::manager::ClientManager;
use super::state::CallShape;
use crate::transport::codec::CodecSpec;

/// The failure that put a client into its error state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFault {
    pub code: ErrorCode,
    pub message: String,
}

pub(crate) struct ClientShared {
    channel: tokio::sync::Mutex<Box<dyn NonblockingChannel>>,
    busy: AtomicBool,
    // Set on failure; whoever takes the channel lock next closes it.
    stale: AtomicBool,
    fault: Mutex<Option<ClientFault>>,
}

impl ClientShared {
    pub(crate) fn channel(&self) -> &tokio::sync::Mutex<Box<dyn NonblockingChannel>> {
        &self.channel
    }

    /// Close the channel if a failure left it dirty. Call with the channel
    /// lock held.
    pub(crate) async fn close_if_stale(&self, channel: &mut Box<dyn NonblockingChannel>) {
        if self.stale.swap(false, Ordering::AcqRel) {
            channel.close().await;
        }
    }

    fn fault(&self) -> Option<ClientFault> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record `e`, close the channel and free the client.
    fn fail(self: &Arc<Self>, e: &WireError) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(ClientFault {
            code: e.code(),
            message: e.to_string(),
        });
        self.stale.store(true, Ordering::Release);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(self);
            handle.spawn(async move {
                let mut channel = shared.channel.lock().await;
                shared.close_if_stale(&mut channel).await;
            });
        }
        self.release();
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub struct AsyncClient {
    manager: ClientManager,
    shared: Arc<ClientShared>,
    spec: CodecSpec,
    timeout: Option<Duration>,
}

impl AsyncClient {
    pub fn new(manager: &ClientManager, spec: CodecSpec, channel: Box<dyn NonblockingChannel>) -> Self {
        Self {
            manager: manager.clone(),
            shared: Arc::new(ClientShared {
                channel: tokio::sync::Mutex::new(channel),
                busy: AtomicBool::new(false),
                stale: AtomicBool::new(false),
                fault: Mutex::new(None),
            }),
            spec,
            timeout: None,
        }
    }

    /// Per-call deadline, measured from when the call is issued.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_error(&self) -> bool {
        self.shared.fault().is_some()
    }

    pub fn error(&self) -> Option<ClientFault> {
        self.shared.fault()
    }

    pub fn clear_error(&self) {
        *self
            .shared
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// A call is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Start a two-way call. `callback` runs exactly once, on the manager
    /// thread, with `result` filled from the reply.
    pub fn call<R, F>(&self, method: &str, args: &dyn WireStruct, result: R, callback: F) -> Result<()>
    where
        R: WireStruct + 'static,
        F: FnOnce(Result<R>) + Send + 'static,
    {
        let spec = self.spec;
        let shared = Arc::clone(&self.shared);
        let name = method.to_string();
        self.submit(method, args, false, move |wire_seq| -> Completion {
            Box::new(move |outcome: Result<Option<Bytes>>| {
                let decoded = outcome
                    .and_then(|body| {
                        body.ok_or_else(|| {
                            WireError::transport(TransportErrorKind::EndOfFile, "no reply body")
                        })
                    })
                    .and_then(|body| decode_reply(&spec, &name, wire_seq, body, result));
                match &decoded {
                    Ok(_) | Err(WireError::Application(_)) => shared.release(),
                    Err(e) => shared.fail(e),
                }
                callback(decoded);
            })
        })
    }

    /// Start a oneway call; `callback` runs once the request is written.
    pub fn call_oneway<F>(&self, method: &str, args: &dyn WireStruct, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.submit(method, args, true, move |_| -> Completion {
            Box::new(move |outcome: Result<Option<Bytes>>| {
                let outcome = outcome.map(drop);
                match &outcome {
                    Ok(()) => shared.release(),
                    Err(e) => shared.fail(e),
                }
                callback(outcome);
            })
        })
    }

    /// `call`, delivered through a future instead of a callback.
    pub fn request<R>(
        &self,
        method: &str,
        args: &dyn WireStruct,
        result: R,
    ) -> impl Future<Output = Result<R>> + Send + 'static
    where
        R: WireStruct + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = self.call(method, args, result, move |res| {
            let _ = tx.send(res);
        });
        async move {
            submitted?;
            rx.await.map_err(|_| dropped_error())?
        }
    }

    pub fn request_oneway(
        &self,
        method: &str,
        args: &dyn WireStruct,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let submitted = self.call_oneway(method, args, move |res| {
            let _ = tx.send(res);
        });
        async move {
            submitted?;
            rx.await.map_err(|_| dropped_error())?
        }
    }

    fn submit(
        &self,
        method: &str,
        args: &dyn WireStruct,
        oneway: bool,
        completion: impl FnOnce(i32) -> Completion,
    ) -> Result<()> {
        self.check_ready()?;
        match self.prepare(method, args, oneway, completion) {
            Ok(call) => self.manager.submit(call).map_err(|(e, _call)| {
                self.shared.release();
                e
            }),
            Err(e) => {
                self.shared.release();
                Err(e)
            }
        }
    }

    fn check_ready(&self) -> Result<()> {
        if let Some(fault) = self.shared.fault() {
            return Err(WireError::IllegalState(format!(
                "client has an error: {}",
                fault.message
            )));
        }
        self.shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(|_| {
                WireError::IllegalState("client is currently executing another method".into())
            })
    }

    fn prepare(
        &self,
        method: &str,
        args: &dyn WireStruct,
        oneway: bool,
        completion: impl FnOnce(i32) -> Completion,
    ) -> Result<MethodCall> {
        let seq_id = next_seq_id();
        // Truncation is intended: the wire field is 32 bits.
        let wire_seq = seq_id as i32;
        let message_type = if oneway {
            MessageType::Oneway
        } else {
            MessageType::Call
        };
        let header = MessageHeader::new(method, message_type, wire_seq);
        let body = self.spec.encode(|codec| {
            codec.write_message_begin(&header)?;
            args.write(codec)?;
            codec.write_message_end()
        })?;

        let max_frame_size = self.spec.config.max_frame_size;
        if body.len() > max_frame_size {
            return Err(WireError::protocol(
                ProtocolErrorKind::SizeLimit,
                format!(
                    "request of {} bytes exceeds max frame size {max_frame_size}",
                    body.len()
                ),
            ));
        }

        Ok(MethodCall::new(
            seq_id,
            method.to_string(),
            CallShape {
                oneway,
                max_frame_size,
            },
            body,
            self.timeout,
            Arc::clone(&self.shared),
            completion(wire_seq),
        ))
    }
}

fn dropped_error() -> WireError {
    WireError::IllegalState("call dropped without completion".into())
}

fn decode_reply<R: WireStruct>(
    spec: &CodecSpec,
    method: &str,
    seq_id: i32,
    body: Bytes,
    mut result: R,
) -> Result<R> {
    spec.decode(body, |codec| {
        let header = codec.read_message_begin()?;
        if header.message_type == MessageType::Exception {
            let ex = ApplicationException::read_from(codec)?;
            codec.read_message_end()?;
            return Err(ex.into());
        }
        if header.seq_id != seq_id {
            return Err(WireError::application(
                ApplicationErrorKind::BadSequenceId,
                format!(
                    "{method} failed: out of sequence response: expected {seq_id} but got {}",
                    header.seq_id
                ),
            ));
        }
        if header.name != method {
            return Err(WireError::application(
                ApplicationErrorKind::WrongMethodName,
                format!("{method} failed: wrong method name in reply: {}", header.name),
            ));
        }
        result.read(codec)?;
        codec.read_message_end()
    })?;
    Ok(result)
}
