//! Codec stacks over fully buffered messages.
//!
//! Server connections, the HTTP endpoint and the async engine all hold whole
//! messages in memory before touching a codec, so decoding runs over a
//! `MemoryInput` and encoding into a `MemoryBuffer`. The codec itself never
//! crosses an `.await`.

use bytes::Bytes;

use wirecall_core::config::{CodecLimits, Configuration};
use wirecall_core::error::{Result, TransportErrorKind, WireError};
use wirecall_core::protocol::{
    skip, BinaryCodec, CompactCodec, JsonCodec, ProtocolKind, TType, WireCodec,
};
use wirecall_core::transport::{MemoryBuffer, MemoryInput};

use crate::config::RuntimeConfig;

/// Which wire format to use and the limits it enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSpec {
    pub protocol: ProtocolKind,
    pub config: Configuration,
    pub limits: CodecLimits,
}

impl CodecSpec {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            config: Configuration::default(),
            limits: CodecLimits::default(),
        }
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            protocol: cfg.server.protocol.kind(),
            config: cfg.limits.configuration()?,
            limits: cfg.limits.codec_limits(),
        })
    }

    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run `f` against a reader over `input`.
    pub fn decode<R>(
        &self,
        input: Bytes,
        f: impl FnOnce(&mut dyn WireCodec) -> Result<R>,
    ) -> Result<R> {
        let trans = MemoryInput::with_config(self.config, input);
        match self.protocol {
            ProtocolKind::Binary => f(&mut BinaryCodec::new(trans).with_limits(self.limits)),
            ProtocolKind::Compact => f(&mut CompactCodec::new(trans).with_limits(self.limits)),
            ProtocolKind::Json => f(&mut JsonCodec::new(trans).with_limits(self.limits)),
        }
    }

    /// Run `f` against a writer and return everything it wrote.
    pub fn encode(&self, f: impl FnOnce(&mut dyn WireCodec) -> Result<()>) -> Result<Bytes> {
        let trans = MemoryBuffer::with_config(self.config);
        match self.protocol {
            ProtocolKind::Binary => {
                let mut codec = BinaryCodec::new(trans).with_limits(self.limits);
                f(&mut codec)?;
                Ok(codec.into_inner().take())
            }
            ProtocolKind::Compact => {
                let mut codec = CompactCodec::new(trans).with_limits(self.limits);
                f(&mut codec)?;
                Ok(codec.into_inner().take())
            }
            ProtocolKind::Json => {
                let mut codec = JsonCodec::new(trans).with_limits(self.limits);
                f(&mut codec)?;
                Ok(codec.into_inner().take())
            }
        }
    }

    /// Length of the first complete message in `buf`, or `None` when more
    /// bytes are needed. Malformed input is an error. `buf` is shared, not
    /// copied.
    pub fn message_len(&self, buf: Bytes) -> Result<Option<usize>> {
        let total = buf.len();
        if total == 0 {
            return Ok(None);
        }
        let scanned = self.decode(buf, |codec| {
            codec.read_message_begin()?;
            skip(codec, TType::Struct)?;
            codec.read_message_end()?;
            Ok(codec.transport().buffered().map_or(0, |rest| rest.len()))
        });
        match scanned {
            Ok(rest) => Ok(Some(total - rest)),
            Err(e) if is_end_of_file(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub fn is_end_of_file(e: &WireError) -> bool {
    matches!(
        e,
        WireError::Transport {
            kind: TransportErrorKind::EndOfFile,
            ..
        }
    )
}
