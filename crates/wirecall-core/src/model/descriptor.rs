//! Struct metadata supplied explicitly at construction.

use std::sync::Arc;

use crate::protocol::TType;

/// Declared type of a field, list element, or map key/value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Byte,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    /// Struct or union, depending on the descriptor's kind.
    Struct(Arc<StructDescriptor>),
    List(Box<FieldType>),
    Set(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    pub fn list(elem: FieldType) -> Self {
        FieldType::List(Box::new(elem))
    }

    pub fn set(elem: FieldType) -> Self {
        FieldType::Set(Box::new(elem))
    }

    pub fn map(key: FieldType, value: FieldType) -> Self {
        FieldType::Map(Box::new(key), Box::new(value))
    }

    /// Wire tag for this type.
    pub fn ttype(&self) -> TType {
        match self {
            FieldType::Bool => TType::Bool,
            FieldType::Byte => TType::Byte,
            FieldType::I16 => TType::I16,
            FieldType::I32 => TType::I32,
            FieldType::I64 => TType::I64,
            FieldType::Double => TType::Double,
            FieldType::String | FieldType::Binary => TType::String,
            FieldType::Struct(_) => TType::Struct,
            FieldType::List(_) => TType::List,
            FieldType::Set(_) => TType::Set,
            FieldType::Map(..) => TType::Map,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requiredness {
    Required,
    Optional,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub id: i16,
    pub name: String,
    pub ty: FieldType,
    pub requiredness: Requiredness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    /// Exactly one field active at a time.
    Union,
}

/// Ordered field set of one struct or union type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDescriptor {
    pub name: String,
    pub kind: StructKind,
    pub fields: Vec<FieldDescriptor>,
}

impl StructDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StructKind::Struct,
            fields: Vec::new(),
        }
    }

    pub fn union(name: impl Into<String>) -> Self {
        Self {
            kind: StructKind::Union,
            ..Self::new(name)
        }
    }

    pub fn field(
        mut self,
        id: i16,
        name: impl Into<String>,
        ty: FieldType,
        requiredness: Requiredness,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            id,
            name: name.into(),
            ty,
            requiredness,
        });
        self
    }

    pub fn required(self, id: i16, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(id, name, ty, Requiredness::Required)
    }

    pub fn optional(self, id: i16, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(id, name, ty, Requiredness::Optional)
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_union(&self) -> bool {
        self.kind == StructKind::Union
    }

    /// Declaration index of field `id`.
    pub fn position(&self, id: i16) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }

    pub fn lookup(&self, id: i16) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }
}
