//! Struct/union contract and a descriptor-driven implementation of it.
//!
//! Field metadata is explicit: a [`StructDescriptor`] lists ids, names,
//! declared types and requiredness. [`DynamicStruct`] and [`DynamicUnion`]
//! hold values against a descriptor and know how to put them on any
//! [`WireCodec`], in either the standard or the positional scheme.

pub mod descriptor;
pub mod dynamic;
pub mod exception;
pub mod union;
pub mod value;

use std::cmp::Ordering;
use std::fmt::Debug;

pub use descriptor::{FieldDescriptor, FieldType, Requiredness, StructDescriptor, StructKind};
pub use dynamic::DynamicStruct;
pub use exception::{ApplicationErrorKind, ApplicationException};
pub use union::DynamicUnion;
pub use value::Value;

use crate::error::Result;
use crate::protocol::WireCodec;

/// Anything that can be read from and written to a codec as one struct.
pub trait WireStruct: Debug + Send {
    /// Replace `self` with the next struct on the wire. Unknown fields are
    /// skipped; missing required fields fail after the struct is consumed.
    fn read(&mut self, codec: &mut dyn WireCodec) -> Result<()>;
    fn write(&self, codec: &mut dyn WireCodec) -> Result<()>;
    fn clear(&mut self);

    /// Current value of field `id` (`None` when unset). Unknown ids fail with
    /// `FIELD_ACCESS`.
    fn field_value(&self, id: i16) -> Result<Option<Value>>;
    fn set_field_value(&mut self, id: i16, value: Value) -> Result<()>;
    fn is_set(&self, id: i16) -> bool;

    fn deep_copy(&self) -> Self
    where
        Self: Sized;

    fn compare(&self, other: &Self) -> Ordering
    where
        Self: Sized;
}
