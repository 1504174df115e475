//! Consume one value of a known wire type without materializing it.
//!
//! This is what lets a reader ignore fields it does not know about: the value
//! is walked field-by-field / element-by-element so the stream ends up exactly
//! after it. Nesting is bounded by a depth counter; hitting zero fails with
//! `DEPTH_LIMIT` instead of recursing further.

use crate::error::{ProtocolErrorKind, Result, WireError};

use super::{TType, WireCodec};

/// Skip bounded by the transport's `recursion_limit`.
pub fn skip(codec: &mut dyn WireCodec, ty: TType) -> Result<()> {
    let limit = codec.transport().configuration().recursion_limit;
    skip_with_depth(codec, ty, limit)
}

pub fn skip_with_depth(codec: &mut dyn WireCodec, ty: TType, max_depth: usize) -> Result<()> {
    if max_depth == 0 {
        return Err(WireError::protocol(
            ProtocolErrorKind::DepthLimit,
            "maximum skip depth exceeded",
        ));
    }
    let depth = max_depth - 1;

    match ty {
        TType::Bool => codec.read_bool().map(drop),
        TType::Byte => codec.read_byte().map(drop),
        TType::I16 => codec.read_i16().map(drop),
        TType::I32 => codec.read_i32().map(drop),
        TType::I64 => codec.read_i64().map(drop),
        TType::Double => codec.read_double().map(drop),
        TType::String => codec.skip_string(),
        TType::Struct => {
            codec.read_struct_begin()?;
            loop {
                let field = codec.read_field_begin()?;
                if field.is_stop() {
                    break;
                }
                skip_with_depth(codec, field.field_type, depth)?;
                codec.read_field_end()?;
            }
            codec.read_struct_end()
        }
        TType::Map => {
            let map = codec.read_map_begin()?;
            for _ in 0..map.size {
                skip_with_depth(codec, map.key_type, depth)?;
                skip_with_depth(codec, map.value_type, depth)?;
            }
            codec.read_map_end()
        }
        TType::Set => {
            let set = codec.read_set_begin()?;
            for _ in 0..set.size {
                skip_with_depth(codec, set.elem_type, depth)?;
            }
            codec.read_set_end()
        }
        TType::List => {
            let list = codec.read_list_begin()?;
            for _ in 0..list.size {
                skip_with_depth(codec, list.elem_type, depth)?;
            }
            codec.read_list_end()
        }
        TType::Stop | TType::Void => Err(WireError::protocol(
            ProtocolErrorKind::InvalidData,
            format!("unrecognized type {}", ty.as_u8()),
        )),
    }
}
