//! Length-prefixed framing over another transport.
//!
//! Wire layout: `u32` big-endian payload length, then exactly that many bytes.
//! Writes accumulate in memory behind 4 reserved bytes; `flush` patches the
//! length in and hands the whole frame to the inner transport in one write.

use bytes::{BufMut, BytesMut};

use crate::config::Configuration;
use crate::error::{Result, TransportErrorKind, WireError};

use super::{MemoryInput, Transport};

const SIZE_FILLER: [u8; 4] = [0; 4];

pub struct FramedTransport<T> {
    inner: T,
    config: Configuration,
    read_buf: MemoryInput,
    write_buf: BytesMut,
}

impl<T: Transport> FramedTransport<T> {
    pub fn new(inner: T) -> Self {
        let config = *inner.configuration();
        let mut write_buf = BytesMut::with_capacity(1024);
        write_buf.put_slice(&SIZE_FILLER);
        Self {
            inner,
            read_buf: MemoryInput::with_config(config, Vec::new()),
            config,
            write_buf,
        }
    }

    /// Override the frame limit taken from the inner transport's configuration.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Drop any unread bytes of the current frame.
    pub fn clear(&mut self) {
        self.read_buf.clear();
    }

    fn read_frame(&mut self) -> Result<()> {
        let mut size_buf = [0u8; 4];
        self.inner.read_all(&mut size_buf)?;
        let size = i32::from_be_bytes(size_buf);

        if size < 0 {
            self.close();
            return Err(WireError::transport(
                TransportErrorKind::CorruptedData,
                format!("negative frame size ({size})"),
            ));
        }
        let size = size as usize;
        if size > self.config.max_frame_size {
            tracing::warn!(size, max = self.config.max_frame_size, "frame too large");
            self.close();
            return Err(WireError::transport(
                TransportErrorKind::CorruptedData,
                format!(
                    "frame size ({size}) larger than max length ({})",
                    self.config.max_frame_size
                ),
            ));
        }

        let mut frame = vec![0u8; size];
        self.inner.read_all(&mut frame)?;
        self.read_buf.reset(frame);
        Ok(())
    }
}

impl<T: Transport> Transport for FramedTransport<T> {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let got = self.read_buf.read(buf)?;
        if got > 0 || buf.is_empty() {
            return Ok(got);
        }
        self.read_frame()?;
        self.read_buf.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_buf.put_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let len = self.write_buf.len() - SIZE_FILLER.len();
        let len = i32::try_from(len).map_err(|_| {
            WireError::transport(TransportErrorKind::Unknown, "frame length overflows i32")
        })?;
        self.write_buf[..4].copy_from_slice(&len.to_be_bytes());

        let frame = self.write_buf.split();
        self.write_buf.put_slice(&SIZE_FILLER);
        self.inner.write(&frame)?;
        self.inner.flush()
    }

    fn buffered(&self) -> Option<&[u8]> {
        self.read_buf.buffered()
    }

    fn consume_buffer(&mut self, len: usize) {
        self.read_buf.consume_buffer(len)
    }

    fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn check_read_bytes_available(&self, num_bytes: u64) -> Result<()> {
        self.read_buf.check_read_bytes_available(num_bytes)
    }

    fn update_known_message_size(&mut self, size: u64) -> Result<()> {
        self.read_buf.update_known_message_size(size)
    }

    fn end_message(&mut self) {
        self.read_buf.end_message()
    }
}
