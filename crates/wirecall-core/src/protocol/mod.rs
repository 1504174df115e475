//! Wire codecs (Binary, Compact, JSON) behind one `WireCodec` contract.
//!
//! Each codec owns its transport and any per-stream state it needs (the
//! Compact field-id stack, the JSON context stack). That state is pushed and
//! popped around every struct/container and is never shared between streams.
//!
//! Every size read off the wire is checked (sign, configured limit, then the
//! transport's remaining message budget) before anything is allocated for it.

pub mod binary;
pub mod compact;
pub mod guess;
pub mod json;
pub mod skip;
pub mod tuple;

pub use binary::BinaryCodec;
pub use compact::CompactCodec;
pub use guess::{guess_protocol, ProtocolKind};
pub use json::JsonCodec;
pub use skip::{skip, skip_with_depth};

use crate::config::CodecLimits;
use crate::error::{ProtocolErrorKind, Result, WireError};
use crate::transport::Transport;

/// Wire type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TType {
    Stop,
    Void,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

impl TType {
    pub fn as_u8(self) -> u8 {
        match self {
            TType::Stop => 0,
            TType::Void => 1,
            TType::Bool => 2,
            TType::Byte => 3,
            TType::Double => 4,
            TType::I16 => 6,
            TType::I32 => 8,
            TType::I64 => 10,
            TType::String => 11,
            TType::Struct => 12,
            TType::Map => 13,
            TType::Set => 14,
            TType::List => 15,
        }
    }

    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => TType::Stop,
            1 => TType::Void,
            2 => TType::Bool,
            3 => TType::Byte,
            4 => TType::Double,
            6 => TType::I16,
            8 => TType::I32,
            10 => TType::I64,
            11 => TType::String,
            12 => TType::Struct,
            13 => TType::Map,
            14 => TType::Set,
            15 => TType::List,
            other => {
                return Err(WireError::protocol(
                    ProtocolErrorKind::InvalidData,
                    format!("unknown type id {other}"),
                ))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Call => 1,
            MessageType::Reply => 2,
            MessageType::Exception => 3,
            MessageType::Oneway => 4,
        }
    }

    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(WireError::protocol(
                ProtocolErrorKind::InvalidData,
                format!("unknown message type {other}"),
            )),
        }
    }
}

/// One RPC envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub seq_id: i32,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, message_type: MessageType, seq_id: i32) -> Self {
        Self {
            name: name.into(),
            message_type,
            seq_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub field_type: TType,
    pub id: i16,
}

impl FieldHeader {
    pub fn is_stop(&self) -> bool {
        self.field_type == TType::Stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub elem_type: TType,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetHeader {
    pub elem_type: TType,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    pub key_type: TType,
    pub value_type: TType,
    pub size: usize,
}

/// How structs are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Field headers, STOP-terminated.
    Standard,
    /// Positional: a presence bitset followed by the present values in
    /// declaration order. No field ids, no element type tags.
    Tuple,
}

/// Read/write contract shared by every wire format. Object safe, so the
/// data model, skip utility and processor work against `&mut dyn WireCodec`.
pub trait WireCodec {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()>;
    fn write_message_end(&mut self) -> Result<()>;
    fn write_struct_begin(&mut self, name: &str) -> Result<()>;
    fn write_struct_end(&mut self) -> Result<()>;
    /// `name` is debug-only for most formats.
    fn write_field_begin(&mut self, name: &str, field_type: TType, id: i16) -> Result<()>;
    fn write_field_end(&mut self) -> Result<()>;
    fn write_field_stop(&mut self) -> Result<()>;
    fn write_map_begin(&mut self, header: &MapHeader) -> Result<()>;
    fn write_map_end(&mut self) -> Result<()>;
    fn write_list_begin(&mut self, header: &ListHeader) -> Result<()>;
    fn write_list_end(&mut self) -> Result<()>;
    fn write_set_begin(&mut self, header: &SetHeader) -> Result<()>;
    fn write_set_end(&mut self) -> Result<()>;
    fn write_bool(&mut self, v: bool) -> Result<()>;
    fn write_byte(&mut self, v: i8) -> Result<()>;
    fn write_i16(&mut self, v: i16) -> Result<()>;
    fn write_i32(&mut self, v: i32) -> Result<()>;
    fn write_i64(&mut self, v: i64) -> Result<()>;
    fn write_double(&mut self, v: f64) -> Result<()>;
    fn write_string(&mut self, v: &str) -> Result<()>;
    fn write_binary(&mut self, v: &[u8]) -> Result<()>;

    fn read_message_begin(&mut self) -> Result<MessageHeader>;
    fn read_message_end(&mut self) -> Result<()>;
    fn read_struct_begin(&mut self) -> Result<()>;
    fn read_struct_end(&mut self) -> Result<()>;
    fn read_field_begin(&mut self) -> Result<FieldHeader>;
    fn read_field_end(&mut self) -> Result<()>;
    fn read_map_begin(&mut self) -> Result<MapHeader>;
    fn read_map_end(&mut self) -> Result<()>;
    fn read_list_begin(&mut self) -> Result<ListHeader>;
    fn read_list_end(&mut self) -> Result<()>;
    fn read_set_begin(&mut self) -> Result<SetHeader>;
    fn read_set_end(&mut self) -> Result<()>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<i8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_binary(&mut self) -> Result<Vec<u8>>;

    /// Consume one string or binary value without decoding it.
    fn skip_string(&mut self) -> Result<()> {
        self.read_binary().map(drop)
    }

    /// Smallest number of bytes one value of `ty` can occupy in this format.
    fn min_serialized_size(&self, ty: TType) -> usize;

    /// String and container limits this codec enforces on reads.
    fn limits(&self) -> CodecLimits;

    fn transport(&mut self) -> &mut dyn Transport;

    fn scheme(&self) -> Scheme {
        Scheme::Standard
    }

    /// Drop per-stream state (context or field-id stacks).
    fn reset(&mut self) {}

    fn flush(&mut self) -> Result<()> {
        self.transport().flush()
    }
}

/// Validate a signed length against a limit and the transport's budget.
pub(crate) fn check_length(
    trans: &dyn Transport,
    len: i64,
    limit: Option<usize>,
    min_elem_size: usize,
) -> Result<usize> {
    if len < 0 {
        return Err(WireError::protocol(
            ProtocolErrorKind::NegativeSize,
            format!("negative length: {len}"),
        ));
    }
    let len = len as usize;
    if let Some(max) = limit {
        if len > max {
            return Err(WireError::protocol(
                ProtocolErrorKind::SizeLimit,
                format!("length {len} exceeds max allowed {max}"),
            ));
        }
    }
    trans.check_read_bytes_available((len as u64).saturating_mul(min_elem_size as u64))?;
    Ok(len)
}

pub(crate) fn check_string_length(
    trans: &dyn Transport,
    len: i64,
    limits: &CodecLimits,
) -> Result<usize> {
    check_length(trans, len, limits.string_limit, 1)
}

pub(crate) fn size_to_i32(size: usize) -> Result<i32> {
    i32::try_from(size).map_err(|_| {
        WireError::protocol(ProtocolErrorKind::SizeLimit, format!("size {size} overflows i32"))
    })
}

/// Read `len` bytes, borrowing from the transport's buffer when it holds them.
pub(crate) fn read_exact_bytes<T: Transport + ?Sized>(trans: &mut T, len: usize) -> Result<Vec<u8>> {
    if let Some(bytes) = trans.buffered().and_then(|b| b.get(..len)).map(|b| b.to_vec()) {
        trans.consume_buffer(len);
        return Ok(bytes);
    }
    let mut out = vec![0u8; len];
    trans.read_all(&mut out)?;
    Ok(out)
}

pub(crate) fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| WireError::protocol(ProtocolErrorKind::InvalidData, "string is not valid utf-8"))
}
