//! In-memory transports.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::Configuration;
use crate::error::{Result, TransportErrorKind, WireError};

use super::{MessageBudget, Transport};

/// Read-only transport over a fully buffered message (zero-copy `Bytes`).
#[derive(Debug, Clone)]
pub struct MemoryInput {
    buf: Bytes,
    config: Configuration,
    budget: MessageBudget,
}

impl MemoryInput {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self::with_config(Configuration::default(), buf)
    }

    pub fn with_config(config: Configuration, buf: impl Into<Bytes>) -> Self {
        let mut t = Self {
            buf: Bytes::new(),
            budget: MessageBudget::new(&config),
            config,
        };
        t.reset(buf);
        t
    }

    /// Replace the contents and restart message accounting at its length.
    pub fn reset(&mut self, buf: impl Into<Bytes>) {
        self.buf = buf.into();
        self.budget.limit_to(self.buf.len() as u64);
    }

    pub fn clear(&mut self) {
        self.reset(Bytes::new());
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

impl Transport for MemoryInput {
    fn is_open(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let n = out.len().min(self.buf.remaining());
        if n > 0 {
            self.buf.copy_to_slice(&mut out[..n]);
            self.budget.count_consumed(n as u64)?;
        }
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<()> {
        Err(WireError::transport(
            TransportErrorKind::Unknown,
            "memory input is read-only",
        ))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn buffered(&self) -> Option<&[u8]> {
        Some(self.buf.chunk())
    }

    fn consume_buffer(&mut self, len: usize) {
        let n = len.min(self.buf.remaining());
        self.buf.advance(n);
        self.budget.consume_saturating(n as u64);
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
        self.budget.limit_to(self.buf.len() as u64);
    }
}

/// Growable read/write buffer. Reads consume from the front.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    buf: BytesMut,
    config: Configuration,
    budget: MessageBudget,
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    pub fn with_config(config: Configuration) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            budget: MessageBudget::new(&config),
            config,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut b = Self::new();
        b.buf.put_slice(data);
        b
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drain every unread byte.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.budget.reset();
    }
}

impl Transport for MemoryBuffer {
    fn is_open(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let n = out.len().min(self.buf.len());
        if n > 0 {
            self.buf.copy_to_slice(&mut out[..n]);
            self.budget.count_consumed(n as u64)?;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buf.put_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn buffered(&self) -> Option<&[u8]> {
        Some(&self.buf)
    }

    fn consume_buffer(&mut self, len: usize) {
        let n = len.min(self.buf.len());
        self.buf.advance(n);
        self.budget.consume_saturating(n as u64);
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
