//! Compact codec: zigzag varints and delta-encoded field ids.
//!
//! Message header: `0x82`, `(type << 5) | version`, varint seqid, name.
//! Field header: `(delta << 4) | type` when `0 < delta <= 15`, otherwise the
//! type byte followed by the full id as a zigzag varint. Bool field values
//! ride in the type nibble. Lists and sets pack sizes up to 14 into the
//! header byte; maps use a varint size followed by one `key << 4 | value` byte.

use crate::config::CodecLimits;
use crate::error::{ProtocolErrorKind, Result, WireError};
use crate::transport::Transport;

use super::{
    check_length, check_string_length, read_exact_bytes, size_to_i32, utf8, FieldHeader,
    ListHeader, MapHeader, MessageHeader, MessageType, Scheme, SetHeader, TType, WireCodec,
};

pub const PROTOCOL_ID: u8 = 0x82;
pub const VERSION: u8 = 1;
pub const VERSION_MASK: u8 = 0x1f;
pub const TYPE_MASK: u8 = 0xe0;
pub const TYPE_BITS: u8 = 0x07;
pub const TYPE_SHIFT_AMOUNT: u8 = 5;

mod ct {
    pub const STOP: u8 = 0x00;
    pub const BOOLEAN_TRUE: u8 = 0x01;
    pub const BOOLEAN_FALSE: u8 = 0x02;
    pub const BYTE: u8 = 0x03;
    pub const I16: u8 = 0x04;
    pub const I32: u8 = 0x05;
    pub const I64: u8 = 0x06;
    pub const DOUBLE: u8 = 0x07;
    pub const BINARY: u8 = 0x08;
    pub const LIST: u8 = 0x09;
    pub const SET: u8 = 0x0a;
    pub const MAP: u8 = 0x0b;
    pub const STRUCT: u8 = 0x0c;
}

pub fn zigzag_i32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn unzigzag_i32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

pub fn zigzag_i64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn unzigzag_i64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Encode `n` as a little-endian base-128 varint; returns the byte count.
pub fn encode_varint(mut n: u64, out: &mut [u8; 10]) -> usize {
    let mut used = 0;
    for slot in out.iter_mut() {
        used += 1;
        if n < 0x80 {
            *slot = n as u8;
            break;
        }
        *slot = (n as u8 & 0x7f) | 0x80;
        n >>= 7;
    }
    used
}

fn compact_type(t: TType) -> Result<u8> {
    Ok(match t {
        TType::Stop => ct::STOP,
        TType::Bool => ct::BOOLEAN_TRUE,
        TType::Byte => ct::BYTE,
        TType::I16 => ct::I16,
        TType::I32 => ct::I32,
        TType::I64 => ct::I64,
        TType::Double => ct::DOUBLE,
        TType::String => ct::BINARY,
        TType::List => ct::LIST,
        TType::Set => ct::SET,
        TType::Map => ct::MAP,
        TType::Struct => ct::STRUCT,
        TType::Void => {
            return Err(WireError::protocol(
                ProtocolErrorKind::InvalidData,
                "void has no compact type",
            ))
        }
    })
}

fn ttype(c: u8) -> Result<TType> {
    Ok(match c {
        ct::STOP => TType::Stop,
        ct::BOOLEAN_TRUE | ct::BOOLEAN_FALSE => TType::Bool,
        ct::BYTE => TType::Byte,
        ct::I16 => TType::I16,
        ct::I32 => TType::I32,
        ct::I64 => TType::I64,
        ct::DOUBLE => TType::Double,
        ct::BINARY => TType::String,
        ct::LIST => TType::List,
        ct::SET => TType::Set,
        ct::MAP => TType::Map,
        ct::STRUCT => TType::Struct,
        other => {
            return Err(WireError::protocol(
                ProtocolErrorKind::InvalidData,
                format!("don't know what type: {other}"),
            ))
        }
    })
}

pub struct CompactCodec<T> {
    trans: T,
    limits: CodecLimits,
    scheme: Scheme,
    last_field_id: i16,
    field_id_stack: Vec<i16>,
    pending_bool_field: Option<i16>,
    pending_bool_value: Option<bool>,
}

impl<T: Transport> CompactCodec<T> {
    pub fn new(trans: T) -> Self {
        Self {
            trans,
            limits: CodecLimits::default(),
            scheme: Scheme::Standard,
            last_field_id: 0,
            field_id_stack: Vec::with_capacity(8),
            pending_bool_field: None,
            pending_bool_value: None,
        }
    }

    /// Positional encoding: structs carry a presence bitset instead of field
    /// headers. Primitive encodings are unchanged.
    pub fn positional(trans: T) -> Self {
        let mut c = Self::new(trans);
        c.scheme = Scheme::Tuple;
        c
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn get_ref(&self) -> &T {
        &self.trans
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.trans
    }

    pub fn into_inner(self) -> T {
        self.trans
    }

    fn write_u8(&mut self, b: u8) -> Result<()> {
        self.trans.write(&[b])
    }

    fn write_varint(&mut self, n: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let used = encode_varint(n, &mut buf);
        self.trans.write(&buf[..used])
    }

    fn write_field_header(&mut self, type_byte: u8, id: i16) -> Result<()> {
        let delta = id as i32 - self.last_field_id as i32;
        if delta > 0 && delta <= 15 {
            self.write_u8(((delta as u8) << 4) | type_byte)?;
        } else {
            self.write_u8(type_byte)?;
            self.write_i16(id)?;
        }
        self.last_field_id = id;
        Ok(())
    }

    fn write_collection_begin(&mut self, elem_type: TType, size: usize) -> Result<()> {
        let et = compact_type(elem_type)?;
        if size <= 14 {
            self.write_u8(((size as u8) << 4) | et)
        } else {
            self.write_u8(0xf0 | et)?;
            self.write_varint(size_to_i32(size)? as u32 as u64)
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        if let Some(&b) = self.trans.buffered().and_then(|s| s.first()) {
            self.trans.consume_buffer(1);
            return Ok(b);
        }
        let mut b = [0u8; 1];
        self.trans.read_all(&mut b)?;
        Ok(b[0])
    }

    fn read_varint(&mut self, max_bytes: u32) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for _ in 0..max_bytes {
            let b = self.read_u8()?;
            result |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::protocol(
            ProtocolErrorKind::InvalidData,
            format!("variable-length int over {max_bytes} bytes"),
        ))
    }

    fn read_varint32(&mut self) -> Result<u32> {
        Ok(self.read_varint(5)? as u32)
    }

    fn read_varint64(&mut self) -> Result<u64> {
        self.read_varint(10)
    }

    fn read_collection_header(&mut self) -> Result<(TType, usize)> {
        let size_and_type = self.read_u8()?;
        let mut size = ((size_and_type >> 4) & 0x0f) as i64;
        if size == 15 {
            size = self.read_varint32()? as i32 as i64;
        }
        let elem_type = ttype(size_and_type & 0x0f)?;
        let min = self.min_serialized_size(elem_type);
        let size = check_length(&self.trans, size, self.limits.container_limit, min)?;
        Ok((elem_type, size))
    }
}

impl<T: Transport> WireCodec for CompactCodec<T> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        self.write_u8(PROTOCOL_ID)?;
        let mt = header.message_type.as_u8();
        self.write_u8((VERSION & VERSION_MASK) | ((mt << TYPE_SHIFT_AMOUNT) & TYPE_MASK))?;
        self.write_varint(header.seq_id as u32 as u64)?;
        self.write_string(&header.name)
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        self.field_id_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        self.last_field_id = self.field_id_stack.pop().ok_or_else(unbalanced)?;
        Ok(())
    }

    fn write_field_begin(&mut self, _name: &str, field_type: TType, id: i16) -> Result<()> {
        if field_type == TType::Bool {
            // Header is written together with the value in write_bool.
            self.pending_bool_field = Some(id);
            return Ok(());
        }
        self.write_field_header(compact_type(field_type)?, id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.write_u8(ct::STOP)
    }

    fn write_map_begin(&mut self, header: &MapHeader) -> Result<()> {
        if header.size == 0 {
            return self.write_u8(0);
        }
        self.write_varint(size_to_i32(header.size)? as u32 as u64)?;
        let kv = (compact_type(header.key_type)? << 4) | compact_type(header.value_type)?;
        self.write_u8(kv)
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, header: &ListHeader) -> Result<()> {
        self.write_collection_begin(header.elem_type, header.size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, header: &SetHeader) -> Result<()> {
        self.write_collection_begin(header.elem_type, header.size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        let type_byte = if v { ct::BOOLEAN_TRUE } else { ct::BOOLEAN_FALSE };
        match self.pending_bool_field.take() {
            Some(id) => self.write_field_header(type_byte, id),
            None => self.write_u8(type_byte),
        }
    }

    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_varint(zigzag_i32(v as i32) as u64)
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_varint(zigzag_i32(v) as u64)
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_varint(zigzag_i64(v))
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.trans.write(&v.to_bits().to_le_bytes())
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_binary(v.as_bytes())
    }

    fn write_binary(&mut self, v: &[u8]) -> Result<()> {
        self.write_varint(size_to_i32(v.len())? as u32 as u64)?;
        self.trans.write(v)
    }

    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let protocol_id = self.read_u8()?;
        if protocol_id != PROTOCOL_ID {
            return Err(WireError::protocol(
                ProtocolErrorKind::BadVersion,
                format!("expected protocol id {PROTOCOL_ID:#x} but got {protocol_id:#x}"),
            ));
        }
        let version_and_type = self.read_u8()?;
        let version = version_and_type & VERSION_MASK;
        if version != VERSION {
            return Err(WireError::protocol(
                ProtocolErrorKind::BadVersion,
                format!("expected version {VERSION} but got {version}"),
            ));
        }
        let message_type =
            MessageType::from_u8((version_and_type >> TYPE_SHIFT_AMOUNT) & TYPE_BITS)?;
        let seq_id = self.read_varint32()? as i32;
        let name = self.read_string()?;
        Ok(MessageHeader {
            name,
            message_type,
            seq_id,
        })
    }

    fn read_message_end(&mut self) -> Result<()> {
        self.trans.end_message();
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        self.field_id_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        self.last_field_id = self.field_id_stack.pop().ok_or_else(unbalanced)?;
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let b = self.read_u8()?;
        let type_nibble = b & 0x0f;
        if type_nibble == ct::STOP {
            return Ok(FieldHeader {
                field_type: TType::Stop,
                id: 0,
            });
        }

        let modifier = (b & 0xf0) >> 4;
        let id = if modifier == 0 {
            self.read_i16()?
        } else {
            self.last_field_id.wrapping_add(modifier as i16)
        };
        let field_type = ttype(type_nibble)?;
        if field_type == TType::Bool {
            self.pending_bool_value = Some(type_nibble == ct::BOOLEAN_TRUE);
        }
        self.last_field_id = id;
        Ok(FieldHeader { field_type, id })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let size = self.read_varint32()? as i32;
        let size = check_length(&self.trans, size as i64, self.limits.container_limit, 0)?;
        let kv = if size == 0 { 0 } else { self.read_u8()? };
        let key_type = ttype(kv >> 4)?;
        let value_type = ttype(kv & 0x0f)?;
        let min = self.min_serialized_size(key_type) + self.min_serialized_size(value_type);
        self.trans
            .check_read_bytes_available((size as u64).saturating_mul(min as u64))?;
        Ok(MapHeader {
            key_type,
            value_type,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        let (elem_type, size) = self.read_collection_header()?;
        Ok(ListHeader { elem_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<SetHeader> {
        let (elem_type, size) = self.read_collection_header()?;
        Ok(SetHeader { elem_type, size })
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.pending_bool_value.take() {
            Some(v) => Ok(v),
            None => Ok(self.read_u8()? == ct::BOOLEAN_TRUE),
        }
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(unzigzag_i32(self.read_varint32()?) as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(unzigzag_i32(self.read_varint32()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(unzigzag_i64(self.read_varint64()?))
    }

    fn read_double(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        self.trans.read_all(&mut b)?;
        Ok(f64::from_bits(u64::from_le_bytes(b)))
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_binary()?;
        utf8(bytes)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint32()? as i32;
        let len = check_string_length(&self.trans, len as i64, &self.limits)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        read_exact_bytes(&mut self.trans, len)
    }

    fn limits(&self) -> CodecLimits {
        self.limits
    }

    fn min_serialized_size(&self, ty: TType) -> usize {
        match ty {
            TType::Stop | TType::Void | TType::Struct => 0,
            TType::Double => 8,
            _ => 1,
        }
    }

    fn transport(&mut self) -> &mut dyn Transport {
        &mut self.trans
    }

    fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn reset(&mut self) {
        self.last_field_id = 0;
        self.field_id_stack.clear();
        self.pending_bool_field = None;
        self.pending_bool_value = None;
    }
}

fn unbalanced() -> WireError {
    WireError::protocol(ProtocolErrorKind::InvalidData, "struct end without matching begin")
}
