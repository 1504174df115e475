//! Sniff the wire format of serialized data from its first and last bytes.

use super::{binary, compact};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Binary,
    Compact,
    Json,
}

impl ProtocolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Binary => "binary",
            ProtocolKind::Compact => "compact",
            ProtocolKind::Json => "json",
        }
    }
}

/// Classify a serialized message or struct, returning `fallback` when the
/// bytes are ambiguous.
///
/// Message envelopes are recognised by their headers (`[..]` for JSON, the
/// strict version word for Binary, protocol id `0x82` for Compact). Bare
/// structs fall through to a byte-pattern heuristic that is reliable when the
/// first field id is below 256.
pub fn guess_protocol(data: &[u8], fallback: ProtocolKind) -> ProtocolKind {
    let (Some(&first), Some(&last)) = (data.first(), data.last()) else {
        return fallback;
    };
    let second = data.get(1).copied();

    if first == b'[' && last == b']' {
        return ProtocolKind::Json;
    }
    let [hi, lo, _, _] = binary::VERSION_1.to_be_bytes();
    if first == hi && second == Some(lo) {
        return ProtocolKind::Binary;
    }
    if first == compact::PROTOCOL_ID
        && second.is_some_and(|b| b & compact::VERSION_MASK == compact::VERSION)
    {
        return ProtocolKind::Compact;
    }

    // `{` .. `}` cannot be Compact: a Compact struct always ends with 0.
    if first == b'{' && last == b'}' {
        return ProtocolKind::Json;
    }
    // Compact ends with a STOP byte, so a non-zero tail means Binary.
    if last != 0 {
        return ProtocolKind::Binary;
    }
    // A short-form Compact field header: delta in the high nibble, type below.
    if (0x11..0x80).contains(&first) {
        return ProtocolKind::Compact;
    }
    // High byte of a Binary field id below 256. Compact would need a field id
    // of zero to produce this.
    if second == Some(0) {
        return ProtocolKind::Binary;
    }
    // Varint continuation bit: a Compact long-form field id above 63.
    if second.is_some_and(|b| b & 0x80 != 0) {
        return ProtocolKind::Compact;
    }
    fallback
}
