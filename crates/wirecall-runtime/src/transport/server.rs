//! TCP server.
//!
//! Each accepted connection gets its own task that reads one request,
//! processes it, writes the reply and loops. Framed connections delimit
//! messages with a 4-byte length prefix; buffered ones find the end of each
//! message by decoding it. A connection ends on EOF, on any transport or
//! header-level protocol error, on a processor request to close, or on
//! shutdown (checked between messages).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use wirecall_core::error::{Result, TransportErrorKind, WireError};

use crate::config::TransportMode;
use crate::dispatch::{Outcome, Processor};

/// Lifecycle hooks. Side effects only; nothing they do changes how a
/// request is handled.
pub trait ServerEventHandler: Send + Sync {
    fn pre_serve(&self, _local: SocketAddr) {}
    fn on_connect(&self, _peer: SocketAddr) {}
    /// Called before each request on a connection is processed.
    fn on_request(&self, _peer: SocketAddr) {}
    fn on_disconnect(&self, _peer: SocketAddr) {}
}

pub struct NoopEvents;

impl ServerEventHandler for NoopEvents {}

/// Cloneable stop signal shared by the accept loop and every connection.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop.
    let _ = rx.wait_for(|stop| *stop).await;
}

pub struct Server {
    processor: Arc<Processor>,
    mode: TransportMode,
    events: Arc<dyn ServerEventHandler>,
    shutdown: ShutdownHandle,
}

impl Server {
    pub fn new(processor: Arc<Processor>, mode: TransportMode) -> Self {
        Self {
            processor,
            mode,
            events: Arc::new(NoopEvents),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn ServerEventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown. In-flight requests finish; their
    /// connections close before reading the next message.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        self.events.pre_serve(local);
        tracing::info!(%local, mode = ?self.mode, "wirecall server accepting");

        let mut stop = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = stopped(&mut stop) => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let conn = Connection {
                processor: Arc::clone(&self.processor),
                events: Arc::clone(&self.events),
                mode: self.mode,
                peer,
                stop: self.shutdown.subscribe(),
            };
            tokio::spawn(conn.run(stream));
        }

        self.processor.metrics().set_draining();
        tracing::info!(%local, "wirecall server stopped");
        Ok(())
    }
}

// --------------------
// Per-connection loop
// --------------------

struct Connection {
    processor: Arc<Processor>,
    events: Arc<dyn ServerEventHandler>,
    mode: TransportMode,
    peer: SocketAddr,
    stop: watch::Receiver<bool>,
}

impl Connection {
    async fn run(mut self, mut stream: TcpStream) {
        let peer = self.peer;
        let metrics = self.processor.metrics();
        let mode = match self.mode {
            TransportMode::Framed => "framed",
            TransportMode::Buffered => "buffered",
        };

        let _ = stream.set_nodelay(true);
        self.events.on_connect(peer);
        metrics.active_connections.inc(&[("transport", mode)]);
        tracing::debug!(%peer, mode, "connection opened");

        let res = match self.mode {
            TransportMode::Framed => self.framed(&mut stream).await,
            TransportMode::Buffered => self.buffered(&mut stream).await,
        };
        if let Err(e) = res {
            tracing::debug!(%peer, error = %e, code = e.code().as_str(), "connection closed on error");
        }

        let _ = stream.shutdown().await;
        metrics.active_connections.dec(&[("transport", mode)]);
        self.events.on_disconnect(peer);
    }

    async fn framed(&mut self, stream: &mut TcpStream) -> Result<()> {
        let max_frame = self.processor.spec().config.max_frame_size;
        loop {
            let mut prefix = [0u8; 4];
            let read = tokio::select! {
                _ = stopped(&mut self.stop) => return Ok(()),
                read = stream.read_exact(&mut prefix) => read,
            };
            match read {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let size = i32::from_be_bytes(prefix);
            if size < 0 {
                return Err(WireError::transport(
                    TransportErrorKind::CorruptedData,
                    format!("Read a negative frame size ({size})"),
                ));
            }
            let size = size as usize;
            if size > max_frame {
                return Err(WireError::transport(
                    TransportErrorKind::CorruptedData,
                    format!("Frame size ({size}) larger than max length ({max_frame})"),
                ));
            }

            let mut body = vec![0u8; size];
            stream.read_exact(&mut body).await?;

            self.events.on_request(self.peer);
            let outcome = self.processor.process(Bytes::from(body)).await?;
            if let Some(reply) = &outcome.reply {
                let len = i32::try_from(reply.len()).map_err(|_| {
                    WireError::transport(TransportErrorKind::CorruptedData, "reply exceeds i32")
                })?;
                let mut out = BytesMut::with_capacity(4 + reply.len());
                out.put_i32(len);
                out.put_slice(reply);
                stream.write_all(&out).await?;
                stream.flush().await?;
            }
            if outcome.close {
                return Ok(());
            }
        }
    }

    async fn buffered(&mut self, stream: &mut TcpStream) -> Result<()> {
        let spec = *self.processor.spec();
        let max_message = spec.config.max_message_size;
        let mut buf = BytesMut::with_capacity(8 * 1024);
        // Length of `buf` when it last scanned as incomplete.
        let mut scanned = 0;
        loop {
            if buf.len() > scanned {
                let pending = std::mem::take(&mut buf).freeze();
                let found = spec.message_len(pending.clone());
                // `pending` is the only handle again, so this reclaims the
                // allocation instead of copying.
                buf = BytesMut::from(pending);
                match found {
                    Ok(Some(len)) => {
                        scanned = 0;
                        let request = buf.split_to(len).freeze();
                        self.events.on_request(self.peer);
                        let outcome = self.processor.process(request).await?;
                        write_reply(stream, &outcome).await?;
                        // The stream position is only trustworthy for messages
                        // that decoded cleanly.
                        if outcome.close || outcome.protocol_error {
                            return Ok(());
                        }
                        continue;
                    }
                    Ok(None) => scanned = buf.len(),
                    Err(e) => {
                        // Let the processor answer if the header is intact.
                        let request = buf.split().freeze();
                        if let Ok(outcome) = self.processor.process(request).await {
                            write_reply(stream, &outcome).await?;
                        }
                        return Err(e);
                    }
                }
            }

            if buf.len() >= max_message {
                return Err(WireError::transport(
                    TransportErrorKind::EndOfFile,
                    "MaxMessageSize reached",
                ));
            }

            let n = tokio::select! {
                _ = stopped(&mut self.stop), if buf.is_empty() => return Ok(()),
                n = stream.read_buf(&mut buf) => n?,
            };
            if n == 0 {
                if buf.is_empty() {
                    return Ok(());
                }
                return Err(WireError::transport(
                    TransportErrorKind::EndOfFile,
                    format!("connection closed with {} bytes of a partial message", buf.len()),
                ));
            }
            // Take everything already queued so a burst is scanned once.
            while buf.len() < max_message {
                match stream.try_read_buf(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

async fn write_reply(stream: &mut TcpStream, outcome: &Outcome) -> Result<()> {
    if let Some(reply) = &outcome.reply {
        stream.write_all(reply).await?;
        stream.flush().await?;
    }
    Ok(())
}
