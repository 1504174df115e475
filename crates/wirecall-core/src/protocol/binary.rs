//! Binary codec: fixed-width big-endian fields.
//!
//! Message header (strict): `i32 (VERSION_1 | type)`, name, `i32 seqid`.
//! Non-strict (read-only compatibility): name, `u8 type`, `i32 seqid`.
//! Field header: `u8 type`, `i16 id`. Structs end with a `0x00` STOP byte.

use crate::config::CodecLimits;
use crate::error::{ProtocolErrorKind, Result, WireError};
use crate::transport::Transport;

use super::{
    check_length, check_string_length, read_exact_bytes, size_to_i32, utf8, FieldHeader,
    ListHeader, MapHeader, MessageHeader, MessageType, SetHeader, TType, WireCodec,
};

pub const VERSION_MASK: u32 = 0xffff_0000;
pub const VERSION_1: u32 = 0x8001_0000;

pub struct BinaryCodec<T> {
    trans: T,
    limits: CodecLimits,
    strict_read: bool,
    strict_write: bool,
}

impl<T: Transport> BinaryCodec<T> {
    /// Strict write, lenient read.
    pub fn new(trans: T) -> Self {
        Self {
            trans,
            limits: CodecLimits::default(),
            strict_read: false,
            strict_write: true,
        }
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn strict(mut self, strict_read: bool, strict_write: bool) -> Self {
        self.strict_read = strict_read;
        self.strict_write = strict_write;
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

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut b = [0u8; N];
        if let Some(src) = self.trans.buffered().and_then(|s| s.get(..N)) {
            b.copy_from_slice(src);
            self.trans.consume_buffer(N);
        } else {
            self.trans.read_all(&mut b)?;
        }
        Ok(b)
    }

    fn read_string_body(&mut self, len: i32) -> Result<String> {
        let len = check_string_length(&self.trans, len as i64, &self.limits)?;
        utf8(read_exact_bytes(&mut self.trans, len)?)
    }

    fn read_type(&mut self) -> Result<TType> {
        let [b] = self.read_fixed::<1>()?;
        TType::from_u8(b)
    }

    fn read_container_size(&mut self, min_elem: usize) -> Result<usize> {
        let size = self.read_i32()?;
        check_length(&self.trans, size as i64, self.limits.container_limit, min_elem)
    }
}

impl<T: Transport> WireCodec for BinaryCodec<T> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        if self.strict_write {
            let version = VERSION_1 | header.message_type.as_u8() as u32;
            self.write_i32(version as i32)?;
            self.write_string(&header.name)?;
            self.write_i32(header.seq_id)
        } else {
            self.write_string(&header.name)?;
            self.write_byte(header.message_type.as_u8() as i8)?;
            self.write_i32(header.seq_id)
        }
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, _name: &str, field_type: TType, id: i16) -> Result<()> {
        self.write_byte(field_type.as_u8() as i8)?;
        self.write_i16(id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.write_byte(TType::Stop.as_u8() as i8)
    }

    fn write_map_begin(&mut self, header: &MapHeader) -> Result<()> {
        self.write_byte(header.key_type.as_u8() as i8)?;
        self.write_byte(header.value_type.as_u8() as i8)?;
        self.write_i32(size_to_i32(header.size)?)
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, header: &ListHeader) -> Result<()> {
        self.write_byte(header.elem_type.as_u8() as i8)?;
        self.write_i32(size_to_i32(header.size)?)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, header: &SetHeader) -> Result<()> {
        self.write_byte(header.elem_type.as_u8() as i8)?;
        self.write_i32(size_to_i32(header.size)?)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_byte(if v { 1 } else { 0 })
    }

    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.trans.write(&v.to_be_bytes())
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.trans.write(&v.to_be_bytes())
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.trans.write(&v.to_be_bytes())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.trans.write(&v.to_be_bytes())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.write_i64(v.to_bits() as i64)
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_binary(v.as_bytes())
    }

    fn write_binary(&mut self, v: &[u8]) -> Result<()> {
        self.write_i32(size_to_i32(v.len())?)?;
        self.trans.write(v)
    }

    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let size = self.read_i32()?;
        if size < 0 {
            let version = size as u32 & VERSION_MASK;
            if version != VERSION_1 {
                return Err(WireError::protocol(
                    ProtocolErrorKind::BadVersion,
                    format!("bad version in read_message_begin: {version:#x}"),
                ));
            }
            let message_type = MessageType::from_u8((size & 0xff) as u8)?;
            let name = self.read_string()?;
            let seq_id = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        } else {
            if self.strict_read {
                return Err(WireError::protocol(
                    ProtocolErrorKind::BadVersion,
                    "missing version in read_message_begin, old client?",
                ));
            }
            let name = self.read_string_body(size)?;
            let message_type = MessageType::from_u8(self.read_byte()? as u8)?;
            let seq_id = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        }
    }

    fn read_message_end(&mut self) -> Result<()> {
        self.trans.end_message();
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let field_type = self.read_type()?;
        let id = if field_type == TType::Stop {
            0
        } else {
            self.read_i16()?
        };
        Ok(FieldHeader { field_type, id })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let key_type = self.read_type()?;
        let value_type = self.read_type()?;
        let min = self.min_serialized_size(key_type) + self.min_serialized_size(value_type);
        let size = self.read_container_size(min)?;
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
        let elem_type = self.read_type()?;
        let size = self.read_container_size(self.min_serialized_size(elem_type))?;
        Ok(ListHeader { elem_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<SetHeader> {
        let elem_type = self.read_type()?;
        let size = self.read_container_size(self.min_serialized_size(elem_type))?;
        Ok(SetHeader { elem_type, size })
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? == 1)
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.read_fixed::<1>()?))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_fixed::<2>()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_fixed::<4>()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_fixed::<8>()?))
    }

    fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        self.read_string_body(len)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_i32()?;
        let len = check_string_length(&self.trans, len as i64, &self.limits)?;
        read_exact_bytes(&mut self.trans, len)
    }

    fn limits(&self) -> CodecLimits {
        self.limits
    }

    fn min_serialized_size(&self, ty: TType) -> usize {
        match ty {
            TType::Stop | TType::Void | TType::Struct => 0,
            TType::Bool | TType::Byte => 1,
            TType::I16 => 2,
            TType::I32 => 4,
            TType::I64 | TType::Double => 8,
            TType::String | TType::Map | TType::Set | TType::List => 4,
        }
    }

    fn transport(&mut self) -> &mut dyn Transport {
        &mut self.trans
    }
}
