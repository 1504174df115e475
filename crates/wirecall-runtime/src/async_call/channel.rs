//! Non-blocking byte channels driven by the client manager's event loop.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wirecall_core::error::{Result, TransportErrorKind, WireError};

/// One connection owned by one async client.
///
/// Every method is awaited on the manager's loop thread, so implementations
/// must not assume any particular runtime beyond that one.
#[async_trait]
pub trait NonblockingChannel: Send {
    /// Open the connection if it is not open yet.
    async fn connect(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    async fn close(&mut self);
}

/// TCP channel that connects lazily on the loop thread, so the socket is
/// registered with the loop's reactor.
pub struct TcpChannel {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| WireError::transport(TransportErrorKind::NotOpen, "channel not connected"))
    }
}

#[async_trait]
impl NonblockingChannel for TcpChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            WireError::transport(
                TransportErrorKind::NotOpen,
                format!("cannot connect to {}: {e}", self.addr),
            )
        })?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(buf).await?;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.read_exact(buf).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
