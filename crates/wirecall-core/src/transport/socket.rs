//! Blocking TCP transport.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::config::Configuration;
use crate::error::{Result, TransportErrorKind, WireError};

use super::{MessageBudget, Transport};

/// Default connect/read/write timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking TCP endpoint with connect, read and write timeouts.
///
/// Writes are buffered until `flush`, so a message goes out in as few
/// syscalls as possible. A read or write that exceeds the socket timeout
/// fails with `TIMED_OUT` instead of blocking the caller indefinitely.
pub struct SocketTransport {
    addr: String,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    socket_timeout: Option<Duration>,
    write_buf: BytesMut,
    config: Configuration,
    budget: MessageBudget,
}

impl SocketTransport {
    /// Unconnected transport; call `open()` to connect.
    pub fn new(addr: impl Into<String>) -> Self {
        let config = Configuration::default();
        Self {
            addr: addr.into(),
            stream: None,
            connect_timeout: DEFAULT_SOCKET_TIMEOUT,
            socket_timeout: Some(DEFAULT_SOCKET_TIMEOUT),
            write_buf: BytesMut::with_capacity(1024),
            budget: MessageBudget::new(&config),
            config,
        }
    }

    /// Wrap an already connected stream (server side).
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let addr = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        let mut t = Self::new(addr);
        stream.set_nodelay(true)?;
        stream.set_read_timeout(t.socket_timeout)?;
        stream.set_write_timeout(t.socket_timeout)?;
        t.stream = Some(stream);
        Ok(t)
    }

    pub fn with_config(mut self, config: Configuration) -> Self {
        self.budget = MessageBudget::new(&config);
        self.config = config;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `None` disables the read/write timeout.
    pub fn with_socket_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        self.socket_timeout = timeout;
        if let Some(s) = &self.stream {
            s.set_read_timeout(timeout)?;
            s.set_write_timeout(timeout)?;
        }
        Ok(self)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| WireError::transport(TransportErrorKind::NotOpen, "socket not open"))
    }
}

impl Transport for SocketTransport {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(WireError::transport(
                TransportErrorKind::AlreadyOpen,
                "socket already connected",
            ));
        }
        if self.addr.is_empty() {
            return Err(WireError::transport(
                TransportErrorKind::NotOpen,
                "cannot open without a remote address",
            ));
        }

        let addrs = self.addr.to_socket_addrs().map_err(|e| {
            WireError::transport(
                TransportErrorKind::NotOpen,
                format!("invalid address '{}': {e}", self.addr),
            )
        })?;

        let mut last_err = None;
        for sa in addrs {
            match TcpStream::connect_timeout(&sa, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(self.socket_timeout)?;
                    stream.set_write_timeout(self.socket_timeout)?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }

        let kind = match &last_err {
            Some(e) if e.kind() == std::io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
            _ => TransportErrorKind::NotOpen,
        };
        Err(WireError::transport(
            kind,
            format!(
                "failed to connect to {}: {}",
                self.addr,
                last_err.map(|e| e.to_string()).unwrap_or_else(|| "no address".into())
            ),
        ))
    }

    fn close(&mut self) {
        if let Some(s) = self.stream.take() {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
        self.write_buf.clear();
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream()?.read(buf)?;
        self.budget.count_consumed(n as u64)?;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(WireError::transport(TransportErrorKind::NotOpen, "socket not open"));
        }
        self.write_buf.put_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let out = self.write_buf.split();
        let stream = self.stream()?;
        stream.write_all(&out)?;
        stream.flush()?;
        // A flushed request closes the previous exchange; restart accounting
        // for the reply.
        self.budget.reset();
        Ok(())
    }

    fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn check_read_bytes_available(&self, num_bytes: u64) -> Result<()> {
        self.budget.check_available(num_bytes)
    }

    fn update_known_message_size(&mut self, size: u64) -> Result<()> {
        self.budget.update_known(size)
    }

    fn end_message(&mut self) {
        self.budget.reset();
    }
}
