//! Dynamically typed field values with a total order.
//!
//! Values of different kinds order by kind: primitives (and structs), then
//! lists, sets, maps, and byte arrays last. Within a kind, containers and
//! byte arrays compare by size first, then element-wise; doubles use IEEE
//! total ordering so every value (NaN included) has a place.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use super::descriptor::{FieldType, StructKind};
use super::dynamic::DynamicStruct;
use super::union::DynamicUnion;

#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Byte(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Struct(DynamicStruct),
    Union(DynamicUnion),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<Value, Value>),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Byte(_) => 1,
            Value::I16(_) => 2,
            Value::I32(_) => 3,
            Value::I64(_) => 4,
            Value::Double(_) => 5,
            Value::String(_) => 6,
            Value::Struct(_) => 7,
            Value::Union(_) => 8,
            Value::List(_) => 9,
            Value::Set(_) => 10,
            Value::Map(_) => 11,
            Value::Binary(_) => 12,
        }
    }

    /// Shallow shape check against a declared type. Container elements are
    /// checked when the value is written.
    pub fn matches(&self, ty: &FieldType) -> bool {
        match (self, ty) {
            (Value::Bool(_), FieldType::Bool)
            | (Value::Byte(_), FieldType::Byte)
            | (Value::I16(_), FieldType::I16)
            | (Value::I32(_), FieldType::I32)
            | (Value::I64(_), FieldType::I64)
            | (Value::Double(_), FieldType::Double)
            | (Value::String(_), FieldType::String)
            | (Value::Binary(_), FieldType::Binary)
            | (Value::List(_), FieldType::List(_))
            | (Value::Set(_), FieldType::Set(_))
            | (Value::Map(_), FieldType::Map(..)) => true,
            (Value::Struct(s), FieldType::Struct(d)) => {
                d.kind == StructKind::Struct && s.descriptor().name == d.name
            }
            (Value::Union(u), FieldType::Struct(d)) => {
                d.kind == StructKind::Union && u.descriptor().name == d.name
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&DynamicStruct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Byte(a), Value::Byte(b)) => a.cmp(b),
            (Value::I16(a), Value::I16(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Struct(a), Value::Struct(b)) => a.compare(b),
            (Value::Union(a), Value::Union(b)) => a.compare(b),
            (Value::List(a), Value::List(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Value::Set(a), Value::Set(b)) => a.len().cmp(&b.len()).then_with(|| a.iter().cmp(b.iter())),
            (Value::Map(a), Value::Map(b)) => a.len().cmp(&b.len()).then_with(|| a.iter().cmp(b.iter())),
            (Value::Binary(a), Value::Binary(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.iter().map(|x| *x as i8).cmp(b.iter().map(|x| *x as i8))),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<DynamicStruct> for Value {
    fn from(v: DynamicStruct) -> Self {
        Value::Struct(v)
    }
}

impl From<DynamicUnion> for Value {
    fn from(v: DynamicUnion) -> Self {
        Value::Union(v)
    }
}
