//! Application-level exception carried in EXCEPTION replies.

use std::cmp::Ordering;
use std::fmt;

use crate::error::Result;
use crate::protocol::{skip, TType, WireCodec};

use super::value::Value;
use super::WireStruct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApplicationErrorKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
    InvalidTransform,
    InvalidProtocol,
    UnsupportedClientType,
}

impl ApplicationErrorKind {
    pub fn as_i32(self) -> i32 {
        match self {
            ApplicationErrorKind::Unknown => 0,
            ApplicationErrorKind::UnknownMethod => 1,
            ApplicationErrorKind::InvalidMessageType => 2,
            ApplicationErrorKind::WrongMethodName => 3,
            ApplicationErrorKind::BadSequenceId => 4,
            ApplicationErrorKind::MissingResult => 5,
            ApplicationErrorKind::InternalError => 6,
            ApplicationErrorKind::ProtocolError => 7,
            ApplicationErrorKind::InvalidTransform => 8,
            ApplicationErrorKind::InvalidProtocol => 9,
            ApplicationErrorKind::UnsupportedClientType => 10,
        }
    }

    /// Unrecognised codes from newer peers collapse to `Unknown`.
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => ApplicationErrorKind::UnknownMethod,
            2 => ApplicationErrorKind::InvalidMessageType,
            3 => ApplicationErrorKind::WrongMethodName,
            4 => ApplicationErrorKind::BadSequenceId,
            5 => ApplicationErrorKind::MissingResult,
            6 => ApplicationErrorKind::InternalError,
            7 => ApplicationErrorKind::ProtocolError,
            8 => ApplicationErrorKind::InvalidTransform,
            9 => ApplicationErrorKind::InvalidProtocol,
            10 => ApplicationErrorKind::UnsupportedClientType,
            _ => ApplicationErrorKind::Unknown,
        }
    }

    pub fn code_str(self) -> &'static str {
        match self {
            ApplicationErrorKind::Unknown => "APPLICATION_UNKNOWN",
            ApplicationErrorKind::UnknownMethod => "APPLICATION_UNKNOWN_METHOD",
            ApplicationErrorKind::InvalidMessageType => "APPLICATION_INVALID_MESSAGE_TYPE",
            ApplicationErrorKind::WrongMethodName => "APPLICATION_WRONG_METHOD_NAME",
            ApplicationErrorKind::BadSequenceId => "APPLICATION_BAD_SEQUENCE_ID",
            ApplicationErrorKind::MissingResult => "APPLICATION_MISSING_RESULT",
            ApplicationErrorKind::InternalError => "APPLICATION_INTERNAL_ERROR",
            ApplicationErrorKind::ProtocolError => "APPLICATION_PROTOCOL_ERROR",
            ApplicationErrorKind::InvalidTransform => "APPLICATION_INVALID_TRANSFORM",
            ApplicationErrorKind::InvalidProtocol => "APPLICATION_INVALID_PROTOCOL",
            ApplicationErrorKind::UnsupportedClientType => "APPLICATION_UNSUPPORTED_CLIENT_TYPE",
        }
    }
}

const MESSAGE_FIELD: i16 = 1;
const TYPE_FIELD: i16 = 2;

/// Wire shape: `{1: string message, 2: i32 type}`, both optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationException {
    pub kind: ApplicationErrorKind,
    pub message: String,
}

impl ApplicationException {
    pub fn new(kind: ApplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Decode from a fresh struct on `codec`.
    pub fn read_from(codec: &mut dyn WireCodec) -> Result<Self> {
        let mut ex = Self::new(ApplicationErrorKind::Unknown, "");
        ex.read(codec)?;
        Ok(ex)
    }
}

impl Default for ApplicationException {
    fn default() -> Self {
        Self::new(ApplicationErrorKind::Unknown, "")
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.code_str())
        } else {
            write!(f, "{} ({})", self.message, self.kind.code_str())
        }
    }
}

impl std::error::Error for ApplicationException {}

impl WireStruct for ApplicationException {
    fn read(&mut self, codec: &mut dyn WireCodec) -> Result<()> {
        self.clear();
        codec.read_struct_begin()?;
        loop {
            let header = codec.read_field_begin()?;
            if header.is_stop() {
                break;
            }
            match (header.id, header.field_type) {
                (MESSAGE_FIELD, TType::String) => self.message = codec.read_string()?,
                (TYPE_FIELD, TType::I32) => {
                    self.kind = ApplicationErrorKind::from_i32(codec.read_i32()?)
                }
                (_, other) => skip(codec, other)?,
            }
            codec.read_field_end()?;
        }
        codec.read_struct_end()
    }

    fn write(&self, codec: &mut dyn WireCodec) -> Result<()> {
        codec.write_struct_begin("TApplicationException")?;
        if !self.message.is_empty() {
            codec.write_field_begin("message", TType::String, MESSAGE_FIELD)?;
            codec.write_string(&self.message)?;
            codec.write_field_end()?;
        }
        codec.write_field_begin("type", TType::I32, TYPE_FIELD)?;
        codec.write_i32(self.kind.as_i32())?;
        codec.write_field_end()?;
        codec.write_field_stop()?;
        codec.write_struct_end()
    }

    fn clear(&mut self) {
        self.kind = ApplicationErrorKind::Unknown;
        self.message.clear();
    }

    fn field_value(&self, id: i16) -> Result<Option<Value>> {
        match id {
            MESSAGE_FIELD => Ok(Some(Value::String(self.message.clone()))),
            TYPE_FIELD => Ok(Some(Value::I32(self.kind.as_i32()))),
            _ => Err(crate::error::WireError::FieldAccess(format!(
                "TApplicationException has no field with id {id}"
            ))),
        }
    }

    fn set_field_value(&mut self, id: i16, value: Value) -> Result<()> {
        match (id, value) {
            (MESSAGE_FIELD, Value::String(s)) => self.message = s,
            (TYPE_FIELD, Value::I32(v)) => self.kind = ApplicationErrorKind::from_i32(v),
            _ => {
                return Err(crate::error::WireError::FieldAccess(format!(
                    "TApplicationException: bad value for field {id}"
                )))
            }
        }
        Ok(())
    }

    fn is_set(&self, id: i16) -> bool {
        match id {
            MESSAGE_FIELD => !self.message.is_empty(),
            TYPE_FIELD => true,
            _ => false,
        }
    }

    fn deep_copy(&self) -> Self {
        self.clone()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.message
            .cmp(&other.message)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}
