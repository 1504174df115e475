//! Shared error type across wirecall crates.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::model::exception::{ApplicationErrorKind, ApplicationException};

/// Connection-level failure kinds. Always fatal to the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Catch-all for I/O failures without a closer match.
    Unknown,
    /// The transport was used before `open` or after `close`.
    NotOpen,
    /// `open` was called on a transport that is already open.
    AlreadyOpen,
    /// A read or connect did not finish before its deadline.
    TimedOut,
    /// The peer closed the stream or the buffer ran dry mid-message.
    EndOfFile,
    /// Framing was inconsistent, such as an oversized or negative frame length.
    CorruptedData,
}

impl TransportErrorKind {
    pub fn as_i32(self) -> i32 {
        match self {
            TransportErrorKind::Unknown => 0,
            TransportErrorKind::NotOpen => 1,
            TransportErrorKind::AlreadyOpen => 2,
            TransportErrorKind::TimedOut => 3,
            TransportErrorKind::EndOfFile => 4,
            TransportErrorKind::CorruptedData => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Unknown => "UNKNOWN",
            TransportErrorKind::NotOpen => "NOT_OPEN",
            TransportErrorKind::AlreadyOpen => "ALREADY_OPEN",
            TransportErrorKind::TimedOut => "TIMED_OUT",
            TransportErrorKind::EndOfFile => "END_OF_FILE",
            TransportErrorKind::CorruptedData => "CORRUPTED_DATA",
        }
    }
}

/// Malformed wire data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Catch-all for decode failures without a closer match.
    Unknown,
    /// Bytes that do not form a valid value, such as a bad type id or out-of-range integer.
    InvalidData,
    /// A length or count prefix was negative.
    NegativeSize,
    /// A length or count exceeded the configured limit or the remaining message budget.
    SizeLimit,
    /// The message header carried an unknown protocol id or version.
    BadVersion,
    /// The codec has no encoding for the requested operation.
    NotImplemented,
    /// Nesting went deeper than the recursion limit.
    DepthLimit,
}

impl ProtocolErrorKind {
    pub fn as_i32(self) -> i32 {
        match self {
            ProtocolErrorKind::Unknown => 0,
            ProtocolErrorKind::InvalidData => 1,
            ProtocolErrorKind::NegativeSize => 2,
            ProtocolErrorKind::SizeLimit => 3,
            ProtocolErrorKind::BadVersion => 4,
            ProtocolErrorKind::NotImplemented => 5,
            ProtocolErrorKind::DepthLimit => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolErrorKind::Unknown => "UNKNOWN",
            ProtocolErrorKind::InvalidData => "INVALID_DATA",
            ProtocolErrorKind::NegativeSize => "NEGATIVE_SIZE",
            ProtocolErrorKind::SizeLimit => "SIZE_LIMIT",
            ProtocolErrorKind::BadVersion => "BAD_VERSION",
            ProtocolErrorKind::NotImplemented => "NOT_IMPLEMENTED",
            ProtocolErrorKind::DepthLimit => "DEPTH_LIMIT",
        }
    }
}

/// Stable error codes (used in logs, metrics labels, and test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Transport(TransportErrorKind),
    Protocol(ProtocolErrorKind),
    Application(ApplicationErrorKind),
    FieldAccess,
    IllegalState,
    Config,
}

impl ErrorCode {
    /// String representation, e.g. `PROTOCOL_SIZE_LIMIT`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Transport(k) => match k {
                TransportErrorKind::Unknown => "TRANSPORT_UNKNOWN",
                TransportErrorKind::NotOpen => "TRANSPORT_NOT_OPEN",
                TransportErrorKind::AlreadyOpen => "TRANSPORT_ALREADY_OPEN",
                TransportErrorKind::TimedOut => "TRANSPORT_TIMED_OUT",
                TransportErrorKind::EndOfFile => "TRANSPORT_END_OF_FILE",
                TransportErrorKind::CorruptedData => "TRANSPORT_CORRUPTED_DATA",
            },
            ErrorCode::Protocol(k) => match k {
                ProtocolErrorKind::Unknown => "PROTOCOL_UNKNOWN",
                ProtocolErrorKind::InvalidData => "PROTOCOL_INVALID_DATA",
                ProtocolErrorKind::NegativeSize => "PROTOCOL_NEGATIVE_SIZE",
                ProtocolErrorKind::SizeLimit => "PROTOCOL_SIZE_LIMIT",
                ProtocolErrorKind::BadVersion => "PROTOCOL_BAD_VERSION",
                ProtocolErrorKind::NotImplemented => "PROTOCOL_NOT_IMPLEMENTED",
                ProtocolErrorKind::DepthLimit => "PROTOCOL_DEPTH_LIMIT",
            },
            ErrorCode::Application(k) => k.code_str(),
            ErrorCode::FieldAccess => "FIELD_ACCESS",
            ErrorCode::IllegalState => "ILLEGAL_STATE",
            ErrorCode::Config => "CONFIG",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, WireError>;

/// Unified error type used by core and runtime.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("transport error ({}): {message}", kind.as_str())]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("protocol error ({}): {message}", kind.as_str())]
    Protocol {
        kind: ProtocolErrorKind,
        message: String,
    },
    #[error("application exception: {0}")]
    Application(ApplicationException),
    /// Misuse of the struct/union API (unknown field id, inactive union
    /// member, type mismatch).
    #[error("field access: {0}")]
    FieldAccess(String),
    /// Client used out of turn (call already in flight, sticky error, or a
    /// stopped manager).
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("config: {0}")]
    Config(String),
}

impl WireError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        WireError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        WireError::Protocol {
            kind,
            message: message.into(),
        }
    }

    pub fn application(kind: ApplicationErrorKind, message: impl Into<String>) -> Self {
        WireError::Application(ApplicationException::new(kind, message))
    }

    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            WireError::Transport { kind, .. } => ErrorCode::Transport(*kind),
            WireError::Protocol { kind, .. } => ErrorCode::Protocol(*kind),
            WireError::Application(ex) => ErrorCode::Application(ex.kind),
            WireError::FieldAccess(_) => ErrorCode::FieldAccess,
            WireError::IllegalState(_) => ErrorCode::IllegalState,
            WireError::Config(_) => ErrorCode::Config,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, WireError::Transport { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, WireError::Protocol { .. })
    }
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::TimedOut,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => TransportErrorKind::EndOfFile,
            io::ErrorKind::NotConnected => TransportErrorKind::NotOpen,
            _ => TransportErrorKind::Unknown,
        };
        WireError::transport(kind, e.to_string())
    }
}

impl From<ApplicationException> for WireError {
    fn from(ex: ApplicationException) -> Self {
        WireError::Application(ex)
    }
}
