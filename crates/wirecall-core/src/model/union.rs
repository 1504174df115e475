//! Descriptor-driven union: at most one active field.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{ProtocolErrorKind, Result, WireError};
use crate::protocol::{skip_with_depth, Scheme, WireCodec};

use super::descriptor::StructDescriptor;
use super::dynamic::{descend, read_value, write_value};
use super::value::Value;
use super::WireStruct;

#[derive(Debug, Clone)]
pub struct DynamicUnion {
    desc: Arc<StructDescriptor>,
    active: Option<(i16, Box<Value>)>,
}

impl DynamicUnion {
    pub fn new(desc: Arc<StructDescriptor>) -> Self {
        Self { desc, active: None }
    }

    pub fn descriptor(&self) -> &Arc<StructDescriptor> {
        &self.desc
    }

    /// Make `id` the active field, replacing whatever was set.
    pub fn set_field(&mut self, id: i16, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let field = self.desc.lookup(id).ok_or_else(|| {
            WireError::FieldAccess(format!("{} has no field with id {id}", self.desc.name))
        })?;
        if !value.matches(&field.ty) {
            return Err(WireError::FieldAccess(format!(
                "{}.{}: value does not match declared type",
                self.desc.name, field.name
            )));
        }
        self.active = Some((id, Box::new(value)));
        Ok(())
    }

    pub fn with(mut self, id: i16, value: impl Into<Value>) -> Result<Self> {
        self.set_field(id, value)?;
        Ok(self)
    }

    pub fn active_id(&self) -> Option<i16> {
        self.active.as_ref().map(|(id, _)| *id)
    }

    pub fn active_value(&self) -> Option<&Value> {
        self.active.as_ref().map(|(_, v)| v.as_ref())
    }

    /// Value of `id`. Asking for a field that is not the active one fails.
    pub fn get(&self, id: i16) -> Result<&Value> {
        match &self.active {
            Some((active, v)) if *active == id => Ok(v),
            Some((active, _)) => Err(WireError::FieldAccess(format!(
                "cannot get field {id} of {}: field {active} is set",
                self.desc.name
            ))),
            None => Err(WireError::FieldAccess(format!(
                "cannot get field {id} of {}: no field is set",
                self.desc.name
            ))),
        }
    }

    pub fn is_set(&self, id: i16) -> bool {
        self.active_id() == Some(id)
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Declaration position of the active field first, then its value.
    pub fn compare(&self, other: &Self) -> Ordering {
        if !Arc::ptr_eq(&self.desc, &other.desc) && self.desc.name != other.desc.name {
            return self.desc.name.cmp(&other.desc.name);
        }
        let pos = |u: &Self| u.active_id().and_then(|id| u.desc.position(id));
        pos(self)
            .cmp(&pos(other))
            .then_with(|| self.active_value().cmp(&other.active_value()))
    }

    pub(crate) fn read_nested(&mut self, codec: &mut dyn WireCodec, depth: usize) -> Result<()> {
        let depth = descend(depth)?;
        self.active = None;
        match codec.scheme() {
            Scheme::Standard => self.read_standard(codec, depth),
            Scheme::Tuple => {
                let id = codec.read_i16()?;
                let field = self.desc.lookup(id).ok_or_else(|| {
                    WireError::protocol(
                        ProtocolErrorKind::InvalidData,
                        format!("{}: unknown union field id {id}", self.desc.name),
                    )
                })?;
                let ty = field.ty.clone();
                let value = read_value(codec, &ty, depth)?;
                self.active = Some((id, Box::new(value)));
                Ok(())
            }
        }
    }

    fn read_standard(&mut self, codec: &mut dyn WireCodec, depth: usize) -> Result<()> {
        codec.read_struct_begin()?;
        let header = codec.read_field_begin()?;
        // Empty union on the wire: no field, no second STOP.
        if header.is_stop() {
            return codec.read_struct_end();
        }
        let known = self
            .desc
            .lookup(header.id)
            .map(|f| f.ty.clone())
            .filter(|ty| ty.ttype() == header.field_type);
        match known {
            Some(ty) => {
                let value = read_value(codec, &ty, depth)?;
                self.active = Some((header.id, Box::new(value)));
            }
            None => skip_with_depth(codec, header.field_type, depth.saturating_add(1))?,
        }
        codec.read_field_end()?;
        let trailer = codec.read_field_begin()?;
        if !trailer.is_stop() {
            return Err(WireError::protocol(
                ProtocolErrorKind::InvalidData,
                format!("{}: union carries more than one field", self.desc.name),
            ));
        }
        codec.read_struct_end()
    }

    pub(crate) fn write_to(&self, codec: &mut dyn WireCodec) -> Result<()> {
        let (id, value) = self.active.as_ref().ok_or_else(|| {
            WireError::protocol(
                ProtocolErrorKind::InvalidData,
                format!("cannot write union {} with no field set", self.desc.name),
            )
        })?;
        let field = self.desc.lookup(*id).ok_or_else(|| {
            WireError::FieldAccess(format!("{} has no field with id {id}", self.desc.name))
        })?;
        match codec.scheme() {
            Scheme::Standard => {
                codec.write_struct_begin(&self.desc.name)?;
                codec.write_field_begin(&field.name, field.ty.ttype(), field.id)?;
                write_value(codec, &field.ty, value)?;
                codec.write_field_end()?;
                codec.write_field_stop()?;
                codec.write_struct_end()
            }
            Scheme::Tuple => {
                codec.write_i16(field.id)?;
                write_value(codec, &field.ty, value)
            }
        }
    }
}

impl WireStruct for DynamicUnion {
    fn read(&mut self, codec: &mut dyn WireCodec) -> Result<()> {
        let limit = codec.transport().configuration().recursion_limit;
        self.read_nested(codec, limit)
    }

    fn write(&self, codec: &mut dyn WireCodec) -> Result<()> {
        self.write_to(codec)
    }

    fn clear(&mut self) {
        DynamicUnion::clear(self)
    }

    fn field_value(&self, id: i16) -> Result<Option<Value>> {
        if self.desc.lookup(id).is_none() {
            return Err(WireError::FieldAccess(format!(
                "{} has no field with id {id}",
                self.desc.name
            )));
        }
        self.get(id).map(|v| Some(v.clone()))
    }

    fn set_field_value(&mut self, id: i16, value: Value) -> Result<()> {
        self.set_field(id, value)
    }

    fn is_set(&self, id: i16) -> bool {
        DynamicUnion::is_set(self, id)
    }

    fn deep_copy(&self) -> Self {
        self.clone()
    }

    fn compare(&self, other: &Self) -> Ordering {
        DynamicUnion::compare(self, other)
    }
}
