//! Descriptor-driven struct: field values keyed by declared id.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ProtocolErrorKind, Result, WireError};
use crate::protocol::tuple::{read_bitset, write_bitset};
use crate::protocol::{
    check_length, skip_with_depth, ListHeader, MapHeader, Scheme, SetHeader, TType, WireCodec,
};

use super::descriptor::{FieldType, Requiredness, StructDescriptor};
use super::union::DynamicUnion;
use super::value::Value;
use super::WireStruct;

#[derive(Debug, Clone)]
pub struct DynamicStruct {
    desc: Arc<StructDescriptor>,
    values: Vec<Option<Value>>,
}

impl DynamicStruct {
    pub fn new(desc: Arc<StructDescriptor>) -> Self {
        let values = vec![None; desc.fields.len()];
        Self { desc, values }
    }

    pub fn descriptor(&self) -> &Arc<StructDescriptor> {
        &self.desc
    }

    pub fn get(&self, id: i16) -> Option<&Value> {
        self.desc
            .position(id)
            .and_then(|i| self.values.get(i))
            .and_then(Option::as_ref)
    }

    pub fn set(&mut self, id: i16, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let i = self.slot(id)?;
        let field = self
            .desc
            .fields
            .get(i)
            .ok_or_else(|| unknown_field(&self.desc, id))?;
        if !value.matches(&field.ty) {
            return Err(WireError::FieldAccess(format!(
                "{}.{}: value does not match declared type",
                self.desc.name, field.name
            )));
        }
        if let Some(v) = self.values.get_mut(i) {
            *v = Some(value);
        }
        Ok(())
    }

    /// Builder form of [`DynamicStruct::set`].
    pub fn with(mut self, id: i16, value: impl Into<Value>) -> Result<Self> {
        self.set(id, value)?;
        Ok(self)
    }

    pub fn unset(&mut self, id: i16) -> Result<()> {
        let i = self.slot(id)?;
        if let Some(v) = self.values.get_mut(i) {
            *v = None;
        }
        Ok(())
    }

    pub fn is_set(&self, id: i16) -> bool {
        self.get(id).is_some()
    }

    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// Fails with `INVALID_DATA` when a required field is unset.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in self.desc.fields.iter().zip(&self.values) {
            if field.requiredness == Requiredness::Required && value.is_none() {
                return Err(WireError::protocol(
                    ProtocolErrorKind::InvalidData,
                    format!(
                        "required field '{}' was not present in {}",
                        field.name, self.desc.name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Field-by-field: presence first (unset before set), then value.
    pub fn compare(&self, other: &Self) -> Ordering {
        if !Arc::ptr_eq(&self.desc, &other.desc) && self.desc.name != other.desc.name {
            return self.desc.name.cmp(&other.desc.name);
        }
        for (a, b) in self.values.iter().zip(&other.values) {
            let ord = match (a, b) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.values.len().cmp(&other.values.len())
    }

    fn slot(&self, id: i16) -> Result<usize> {
        self.desc
            .position(id)
            .ok_or_else(|| unknown_field(&self.desc, id))
    }

    pub(crate) fn read_nested(&mut self, codec: &mut dyn WireCodec, depth: usize) -> Result<()> {
        let depth = descend(depth)?;
        self.clear();
        match codec.scheme() {
            Scheme::Standard => self.read_standard(codec, depth)?,
            Scheme::Tuple => self.read_tuple(codec, depth)?,
        }
        self.validate()
    }

    fn read_standard(&mut self, codec: &mut dyn WireCodec, depth: usize) -> Result<()> {
        codec.read_struct_begin()?;
        loop {
            let header = codec.read_field_begin()?;
            if header.is_stop() {
                break;
            }
            let known = self
                .desc
                .position(header.id)
                .and_then(|i| self.desc.fields.get(i).map(|f| (i, f.ty.clone())))
                .filter(|(_, ty)| ty.ttype() == header.field_type);
            match known {
                Some((i, ty)) => {
                    let value = read_value(codec, &ty, depth)?;
                    if let Some(slot) = self.values.get_mut(i) {
                        *slot = Some(value);
                    }
                }
                None => {
                    tracing::trace!(
                        strukt = %self.desc.name,
                        field_id = header.id,
                        "skipping unknown field"
                    );
                    skip_with_depth(codec, header.field_type, depth.saturating_add(1))?;
                }
            }
            codec.read_field_end()?;
        }
        codec.read_struct_end()
    }

    fn read_tuple(&mut self, codec: &mut dyn WireCodec, depth: usize) -> Result<()> {
        let desc = Arc::clone(&self.desc);
        for (i, field) in desc.fields.iter().enumerate() {
            if field.requiredness == Requiredness::Required {
                let value = read_value(codec, &field.ty, depth)?;
                if let Some(slot) = self.values.get_mut(i) {
                    *slot = Some(value);
                }
            }
        }
        let optional: Vec<usize> = desc
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.requiredness != Requiredness::Required)
            .map(|(i, _)| i)
            .collect();
        let present = read_bitset(codec, optional.len())?;
        for (i, set) in optional.into_iter().zip(present) {
            if !set {
                continue;
            }
            if let Some(field) = desc.fields.get(i) {
                let value = read_value(codec, &field.ty, depth)?;
                if let Some(slot) = self.values.get_mut(i) {
                    *slot = Some(value);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_to(&self, codec: &mut dyn WireCodec) -> Result<()> {
        self.validate()?;
        match codec.scheme() {
            Scheme::Standard => {
                codec.write_struct_begin(&self.desc.name)?;
                for (field, value) in self.desc.fields.iter().zip(&self.values) {
                    if let Some(value) = value {
                        codec.write_field_begin(&field.name, field.ty.ttype(), field.id)?;
                        write_value(codec, &field.ty, value)?;
                        codec.write_field_end()?;
                    }
                }
                codec.write_field_stop()?;
                codec.write_struct_end()
            }
            Scheme::Tuple => {
                let mut bits = Vec::new();
                for (field, value) in self.desc.fields.iter().zip(&self.values) {
                    match (field.requiredness, value) {
                        (Requiredness::Required, Some(v)) => write_value(codec, &field.ty, v)?,
                        (Requiredness::Required, None) => {}
                        (_, v) => bits.push(v.is_some()),
                    }
                }
                write_bitset(codec, &bits)?;
                for (field, value) in self.desc.fields.iter().zip(&self.values) {
                    if field.requiredness == Requiredness::Required {
                        continue;
                    }
                    if let Some(v) = value {
                        write_value(codec, &field.ty, v)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl WireStruct for DynamicStruct {
    fn read(&mut self, codec: &mut dyn WireCodec) -> Result<()> {
        let limit = codec.transport().configuration().recursion_limit;
        self.read_nested(codec, limit)
    }

    fn write(&self, codec: &mut dyn WireCodec) -> Result<()> {
        self.write_to(codec)
    }

    fn clear(&mut self) {
        DynamicStruct::clear(self)
    }

    fn field_value(&self, id: i16) -> Result<Option<Value>> {
        self.slot(id)?;
        Ok(self.get(id).cloned())
    }

    fn set_field_value(&mut self, id: i16, value: Value) -> Result<()> {
        self.set(id, value)
    }

    fn is_set(&self, id: i16) -> bool {
        DynamicStruct::is_set(self, id)
    }

    fn deep_copy(&self) -> Self {
        self.clone()
    }

    fn compare(&self, other: &Self) -> Ordering {
        DynamicStruct::compare(self, other)
    }
}

// ----------------------------------------------------------------------------
// Value encoding shared by structs and unions
// ----------------------------------------------------------------------------

fn unknown_field(desc: &StructDescriptor, id: i16) -> WireError {
    WireError::FieldAccess(format!("{} has no field with id {id}", desc.name))
}

fn mismatch(ty: &FieldType) -> WireError {
    WireError::FieldAccess(format!("value does not match declared type {:?}", ty.ttype()))
}

pub(crate) fn descend(depth: usize) -> Result<usize> {
    depth.checked_sub(1).ok_or_else(|| {
        WireError::protocol(ProtocolErrorKind::DepthLimit, "maximum struct depth exceeded")
    })
}

fn element_type_error(expected: TType, got: TType) -> WireError {
    WireError::protocol(
        ProtocolErrorKind::InvalidData,
        format!("element type mismatch: expected {expected:?}, got {got:?}"),
    )
}

/// Positional containers carry a bare i32 count.
fn read_tuple_size(codec: &mut dyn WireCodec, min_elem_size: usize) -> Result<usize> {
    let n = codec.read_i32()?;
    let limit = codec.limits().container_limit;
    check_length(codec.transport(), n as i64, limit, min_elem_size)
}

/// Counts come off the wire; reserve no more than this up front.
const MAX_PREALLOC: usize = 1024;

pub(crate) fn write_value(codec: &mut dyn WireCodec, ty: &FieldType, value: &Value) -> Result<()> {
    let tuple = codec.scheme() == Scheme::Tuple;
    match (ty, value) {
        (FieldType::Bool, Value::Bool(v)) => codec.write_bool(*v),
        (FieldType::Byte, Value::Byte(v)) => codec.write_byte(*v),
        (FieldType::I16, Value::I16(v)) => codec.write_i16(*v),
        (FieldType::I32, Value::I32(v)) => codec.write_i32(*v),
        (FieldType::I64, Value::I64(v)) => codec.write_i64(*v),
        (FieldType::Double, Value::Double(v)) => codec.write_double(*v),
        (FieldType::String, Value::String(v)) => codec.write_string(v),
        (FieldType::Binary, Value::Binary(v)) => codec.write_binary(v),
        (FieldType::Struct(_), Value::Struct(s)) if value.matches(ty) => s.write_to(codec),
        (FieldType::Struct(_), Value::Union(u)) if value.matches(ty) => u.write_to(codec),
        (FieldType::List(elem), Value::List(items)) => {
            if tuple {
                codec.write_i32(crate::protocol::size_to_i32(items.len())?)?;
            } else {
                codec.write_list_begin(&ListHeader {
                    elem_type: elem.ttype(),
                    size: items.len(),
                })?;
            }
            for item in items {
                write_value(codec, elem, item)?;
            }
            if tuple {
                Ok(())
            } else {
                codec.write_list_end()
            }
        }
        (FieldType::Set(elem), Value::Set(items)) => {
            if tuple {
                codec.write_i32(crate::protocol::size_to_i32(items.len())?)?;
            } else {
                codec.write_set_begin(&SetHeader {
                    elem_type: elem.ttype(),
                    size: items.len(),
                })?;
            }
            for item in items {
                write_value(codec, elem, item)?;
            }
            if tuple {
                Ok(())
            } else {
                codec.write_set_end()
            }
        }
        (FieldType::Map(kt, vt), Value::Map(entries)) => {
            if tuple {
                codec.write_i32(crate::protocol::size_to_i32(entries.len())?)?;
            } else {
                codec.write_map_begin(&MapHeader {
                    key_type: kt.ttype(),
                    value_type: vt.ttype(),
                    size: entries.len(),
                })?;
            }
            for (k, v) in entries {
                write_value(codec, kt, k)?;
                write_value(codec, vt, v)?;
            }
            if tuple {
                Ok(())
            } else {
                codec.write_map_end()
            }
        }
        _ => Err(mismatch(ty)),
    }
}

pub(crate) fn read_value(codec: &mut dyn WireCodec, ty: &FieldType, depth: usize) -> Result<Value> {
    let tuple = codec.scheme() == Scheme::Tuple;
    Ok(match ty {
        FieldType::Bool => Value::Bool(codec.read_bool()?),
        FieldType::Byte => Value::Byte(codec.read_byte()?),
        FieldType::I16 => Value::I16(codec.read_i16()?),
        FieldType::I32 => Value::I32(codec.read_i32()?),
        FieldType::I64 => Value::I64(codec.read_i64()?),
        FieldType::Double => Value::Double(codec.read_double()?),
        FieldType::String => Value::String(codec.read_string()?),
        FieldType::Binary => Value::Binary(codec.read_binary()?),
        FieldType::Struct(desc) if desc.is_union() => {
            let mut u = DynamicUnion::new(Arc::clone(desc));
            u.read_nested(codec, depth)?;
            Value::Union(u)
        }
        FieldType::Struct(desc) => {
            let mut s = DynamicStruct::new(Arc::clone(desc));
            s.read_nested(codec, depth)?;
            Value::Struct(s)
        }
        FieldType::List(elem) => {
            let depth = descend(depth)?;
            let size = if tuple {
                let min = codec.min_serialized_size(elem.ttype());
                read_tuple_size(codec, min)?
            } else {
                let header = codec.read_list_begin()?;
                if header.size > 0 && header.elem_type != elem.ttype() {
                    return Err(element_type_error(elem.ttype(), header.elem_type));
                }
                header.size
            };
            let mut items = Vec::with_capacity(size.min(MAX_PREALLOC));
            for _ in 0..size {
                items.push(read_value(codec, elem, depth)?);
            }
            if !tuple {
                codec.read_list_end()?;
            }
            Value::List(items)
        }
        FieldType::Set(elem) => {
            let depth = descend(depth)?;
            let size = if tuple {
                let min = codec.min_serialized_size(elem.ttype());
                read_tuple_size(codec, min)?
            } else {
                let header = codec.read_set_begin()?;
                if header.size > 0 && header.elem_type != elem.ttype() {
                    return Err(element_type_error(elem.ttype(), header.elem_type));
                }
                header.size
            };
            let mut items = BTreeSet::new();
            for _ in 0..size {
                items.insert(read_value(codec, elem, depth)?);
            }
            if !tuple {
                codec.read_set_end()?;
            }
            Value::Set(items)
        }
        FieldType::Map(kt, vt) => {
            let depth = descend(depth)?;
            let size = if tuple {
                let min = codec.min_serialized_size(kt.ttype()) + codec.min_serialized_size(vt.ttype());
                read_tuple_size(codec, min)?
            } else {
                let header = codec.read_map_begin()?;
                if header.size > 0 && header.key_type != kt.ttype() {
                    return Err(element_type_error(kt.ttype(), header.key_type));
                }
                if header.size > 0 && header.value_type != vt.ttype() {
                    return Err(element_type_error(vt.ttype(), header.value_type));
                }
                header.size
            };
            let mut entries = BTreeMap::new();
            for _ in 0..size {
                let k = read_value(codec, kt, depth)?;
                let v = read_value(codec, vt, depth)?;
                entries.insert(k, v);
            }
            if !tuple {
                codec.read_map_end()?;
            }
            Value::Map(entries)
        }
    })
}
