//! Byte-stream endpoints.
//!
//! - `MemoryInput` / `MemoryBuffer`: in-memory read and read/write buffers.
//! - `FramedTransport`: 4-byte big-endian length-prefixed frames over any transport.
//! - `SocketTransport`: blocking TCP with connect/read/write timeouts.
//! - `HttpClientTransport`: one POST per flushed message.
//!
//! Transports are not safe for concurrent use by more than one logical call;
//! callers keep one in-flight request per instance.

pub mod budget;
pub mod framed;
pub mod http;
pub mod memory;
pub mod socket;

pub use budget::MessageBudget;
pub use framed::FramedTransport;
pub use http::HttpClientTransport;
pub use memory::{MemoryBuffer, MemoryInput};
pub use socket::SocketTransport;

use crate::config::Configuration;
use crate::error::{Result, TransportErrorKind, WireError};

/// Common read/write contract over a byte stream.
pub trait Transport {
    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Read up to `buf.len()` bytes. May return fewer; `0` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes or fail with `END_OF_FILE`.
    fn read_all(&mut self, buf: &mut [u8]) -> Result<()> {
        let want = buf.len();
        let mut got = 0;
        while got < want {
            let n = self.read(&mut buf[got..])?;
            if n == 0 {
                return Err(WireError::transport(
                    TransportErrorKind::EndOfFile,
                    format!("remote side closed: wanted {want} bytes, got {got}"),
                ));
            }
            got += n;
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Direct view of bytes already buffered for reading, if the transport
    /// holds a fully buffered frame. Codecs use it to avoid a copy.
    fn buffered(&self) -> Option<&[u8]> {
        None
    }

    /// Mark `len` bytes of the `buffered()` view as consumed.
    fn consume_buffer(&mut self, _len: usize) {}

    fn configuration(&self) -> &Configuration;

    /// Fail fast if fewer than `num_bytes` remain in the message budget.
    fn check_read_bytes_available(&self, _num_bytes: u64) -> Result<()> {
        Ok(())
    }

    /// Tell the transport how large the current message is (`0` resets to
    /// the configured maximum).
    fn update_known_message_size(&mut self, _size: u64) -> Result<()> {
        Ok(())
    }

    /// A message has been read to its end; restart budget accounting.
    fn end_message(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }
    fn read_all(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_all(buf)
    }
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn buffered(&self) -> Option<&[u8]> {
        (**self).buffered()
    }
    fn consume_buffer(&mut self, len: usize) {
        (**self).consume_buffer(len)
    }
    fn configuration(&self) -> &Configuration {
        (**self).configuration()
    }
    fn check_read_bytes_available(&self, num_bytes: u64) -> Result<()> {
        (**self).check_read_bytes_available(num_bytes)
    }
    fn update_known_message_size(&mut self, size: u64) -> Result<()> {
        (**self).update_known_message_size(size)
    }
    fn end_message(&mut self) {
        (**self).end_message()
    }
}
