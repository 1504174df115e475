//! JSON codec.
//!
//! Messages are `[1,"name",type,seqid,{...}]`; structs are objects keyed by
//! field id whose values are `{"<tag>":value}`; maps are
//! `["<ktag>","<vtag>",size,{k:v,...}]`; lists and sets are
//! `["<tag>",size,v,...]`. Binary is unpadded base64. Numbers in key position
//! (and NaN/Infinity anywhere) are quoted.
//!
//! Delimiters are driven by a context stack: a list context emits a comma
//! before every item but the first, a pair context alternates colon and comma
//! and knows when the next token is a key. Every composite begin pushes a
//! context and every end pops it.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::config::CodecLimits;
use crate::error::{ProtocolErrorKind, Result, WireError};
use crate::transport::Transport;

use super::{
    check_length, utf8, FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, SetHeader,
    TType, WireCodec,
};

pub const VERSION: i64 = 1;

const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const ESCAPE_CHARS: &[u8] = b"\"\\/bfnrt";
const ESCAPE_CHAR_VALS: &[u8] = b"\"\\/\x08\x0c\n\r\t";

#[derive(Debug, Clone, Copy)]
enum Context {
    Base,
    List { first: bool },
    Pair { first: bool, colon: bool },
}

impl Context {
    /// Next token sits in key position and must be a JSON string.
    fn escape_num(&self) -> bool {
        matches!(self, Context::Pair { colon: true, .. })
    }

    /// Separator due before the next token, advancing the context.
    fn advance(&mut self) -> Option<u8> {
        match self {
            Context::Base => None,
            Context::List { first } => {
                if *first {
                    *first = false;
                    None
                } else {
                    Some(b',')
                }
            }
            Context::Pair { first, colon } => {
                if *first {
                    *first = false;
                    *colon = true;
                    None
                } else {
                    let sep = if *colon { b':' } else { b',' };
                    *colon = !*colon;
                    Some(sep)
                }
            }
        }
    }
}

fn type_name(t: TType) -> Result<&'static [u8]> {
    Ok(match t {
        TType::Bool => b"tf",
        TType::Byte => b"i8",
        TType::I16 => b"i16",
        TType::I32 => b"i32",
        TType::I64 => b"i64",
        TType::Double => b"dbl",
        TType::Struct => b"rec",
        TType::String => b"str",
        TType::Map => b"map",
        TType::List => b"lst",
        TType::Set => b"set",
        TType::Stop | TType::Void => {
            return Err(WireError::protocol(
                ProtocolErrorKind::NotImplemented,
                "unrecognized type",
            ))
        }
    })
}

fn type_for_name(name: &[u8]) -> Result<TType> {
    Ok(match name {
        b"tf" => TType::Bool,
        b"i8" => TType::Byte,
        b"i16" => TType::I16,
        b"i32" => TType::I32,
        b"i64" => TType::I64,
        b"dbl" => TType::Double,
        b"rec" => TType::Struct,
        b"str" => TType::String,
        b"map" => TType::Map,
        b"lst" => TType::List,
        b"set" => TType::Set,
        _ => {
            return Err(WireError::protocol(
                ProtocolErrorKind::NotImplemented,
                "unrecognized type",
            ))
        }
    })
}

fn is_json_numeric(b: u8) -> bool {
    matches!(b, b'+' | b'-' | b'.' | b'0'..=b'9' | b'E' | b'e')
}

fn hex_char(v: u8) -> u8 {
    let v = v & 0x0f;
    if v < 10 {
        b'0' + v
    } else {
        b'a' + v - 10
    }
}

fn hex_val(ch: u8) -> Result<u16> {
    match ch {
        b'0'..=b'9' => Ok((ch - b'0') as u16),
        b'a'..=b'f' => Ok((ch - b'a' + 10) as u16),
        b'A'..=b'F' => Ok((ch - b'A' + 10) as u16),
        _ => Err(invalid("expected hex character")),
    }
}

fn invalid(msg: &str) -> WireError {
    WireError::protocol(ProtocolErrorKind::InvalidData, msg)
}

/// Narrow a parsed JSON integer, rejecting values the target cannot hold.
fn narrow<T: TryFrom<i64>>(v: i64, what: &str) -> Result<T> {
    T::try_from(v).map_err(|_| {
        WireError::protocol(
            ProtocolErrorKind::InvalidData,
            format!("{what} out of range: {v}"),
        )
    })
}

/// Append `b` to `out` with JSON escaping.
fn escape_byte(b: u8, out: &mut Vec<u8>) {
    match b {
        b'\\' => out.extend_from_slice(b"\\\\"),
        b'"' => out.extend_from_slice(b"\\\""),
        0x08 => out.extend_from_slice(b"\\b"),
        b'\t' => out.extend_from_slice(b"\\t"),
        b'\n' => out.extend_from_slice(b"\\n"),
        0x0c => out.extend_from_slice(b"\\f"),
        b'\r' => out.extend_from_slice(b"\\r"),
        0x00..=0x1f => out.extend_from_slice(&[b'\\', b'u', b'0', b'0', hex_char(b >> 4), hex_char(b)]),
        _ => out.push(b),
    }
}

pub struct JsonCodec<T> {
    trans: T,
    limits: CodecLimits,
    field_names_as_string: bool,
    context: Context,
    stack: Vec<Context>,
    lookahead: Option<u8>,
}

impl<T: Transport> JsonCodec<T> {
    pub fn new(trans: T) -> Self {
        Self {
            trans,
            limits: CodecLimits::default(),
            field_names_as_string: false,
            context: Context::Base,
            stack: Vec::with_capacity(8),
            lookahead: None,
        }
    }

    /// Key struct fields by name instead of numeric id. Output in this mode
    /// is meant for humans and other tooling; it cannot be read back.
    pub fn with_field_names(mut self, enabled: bool) -> Self {
        self.field_names_as_string = enabled;
        self
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
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

    // --------------------
    // Context stack
    // --------------------
    fn push_context(&mut self, c: Context) {
        self.stack.push(self.context);
        self.context = c;
    }

    fn pop_context(&mut self) -> Result<()> {
        self.context = self
            .stack
            .pop()
            .ok_or_else(|| invalid("unbalanced json context"))?;
        Ok(())
    }

    fn reset_context(&mut self) {
        self.stack.clear();
        self.context = Context::Base;
    }

    fn context_write(&mut self) -> Result<()> {
        match self.context.advance() {
            Some(sep) => self.trans.write(&[sep]),
            None => Ok(()),
        }
    }

    fn context_read(&mut self) -> Result<()> {
        match self.context.advance() {
            Some(sep) => self.read_syntax_char(sep),
            None => Ok(()),
        }
    }

    // --------------------
    // Lookahead reader
    // --------------------
    fn read_raw(&mut self) -> Result<u8> {
        if let Some(&b) = self.trans.buffered().and_then(|s| s.first()) {
            self.trans.consume_buffer(1);
            return Ok(b);
        }
        let mut b = [0u8; 1];
        self.trans.read_all(&mut b)?;
        Ok(b[0])
    }

    fn next_byte(&mut self) -> Result<u8> {
        match self.lookahead.take() {
            Some(b) => Ok(b),
            None => self.read_raw(),
        }
    }

    fn peek(&mut self) -> Result<u8> {
        if let Some(b) = self.lookahead {
            return Ok(b);
        }
        let b = self.read_raw()?;
        self.lookahead = Some(b);
        Ok(b)
    }

    fn read_syntax_char(&mut self, expected: u8) -> Result<()> {
        let ch = self.next_byte()?;
        if ch != expected {
            return Err(invalid(&format!("unexpected character: {}", ch as char)));
        }
        Ok(())
    }

    // --------------------
    // Writers
    // --------------------
    fn write_json_string(&mut self, bytes: &[u8]) -> Result<()> {
        self.context_write()?;
        let mut out = Vec::with_capacity(bytes.len() + 2);
        out.push(b'"');
        for &b in bytes {
            escape_byte(b, &mut out);
        }
        out.push(b'"');
        self.trans.write(&out)
    }

    fn write_json_integer(&mut self, n: i64) -> Result<()> {
        self.context_write()?;
        let s = n.to_string();
        if self.context.escape_num() {
            self.trans.write(format!("\"{s}\"").as_bytes())
        } else {
            self.trans.write(s.as_bytes())
        }
    }

    fn write_json_double(&mut self, v: f64) -> Result<()> {
        self.context_write()?;
        let (s, special) = if v.is_nan() {
            ("NaN".to_string(), true)
        } else if v.is_infinite() {
            let s = if v > 0.0 { "Infinity" } else { "-Infinity" };
            (s.to_string(), true)
        } else {
            (format!("{v:?}"), false)
        };
        if special || self.context.escape_num() {
            self.trans.write(format!("\"{s}\"").as_bytes())
        } else {
            self.trans.write(s.as_bytes())
        }
    }

    fn write_json_object_start(&mut self) -> Result<()> {
        self.context_write()?;
        self.trans.write(b"{")?;
        self.push_context(Context::Pair {
            first: true,
            colon: true,
        });
        Ok(())
    }

    fn write_json_object_end(&mut self) -> Result<()> {
        self.pop_context()?;
        self.trans.write(b"}")
    }

    fn write_json_array_start(&mut self) -> Result<()> {
        self.context_write()?;
        self.trans.write(b"[")?;
        self.push_context(Context::List { first: true });
        Ok(())
    }

    fn write_json_array_end(&mut self) -> Result<()> {
        self.pop_context()?;
        self.trans.write(b"]")
    }

    // --------------------
    // Readers
    // --------------------
    fn read_json_string(&mut self, skip_context: bool) -> Result<Vec<u8>> {
        if !skip_context {
            self.context_read()?;
        }
        self.read_syntax_char(b'"')?;

        let mut out = Vec::with_capacity(16);
        let mut high_surrogate: Option<u16> = None;
        loop {
            let mut ch = self.next_byte()?;
            if ch == b'"' {
                break;
            }
            if ch == b'\\' {
                let esc = self.next_byte()?;
                if esc == b'u' {
                    let mut cu = 0u16;
                    for _ in 0..4 {
                        cu = (cu << 4) | hex_val(self.next_byte()?)?;
                    }
                    if (0xd800..=0xdbff).contains(&cu) {
                        if high_surrogate.is_some() {
                            return Err(invalid("expected low surrogate char"));
                        }
                        high_surrogate = Some(cu);
                        continue;
                    }
                    let c = if (0xdc00..=0xdfff).contains(&cu) {
                        let high = high_surrogate
                            .take()
                            .ok_or_else(|| invalid("expected high surrogate char"))?;
                        char::decode_utf16([high, cu])
                            .next()
                            .and_then(|r| r.ok())
                            .ok_or_else(|| invalid("invalid unicode sequence"))?
                    } else {
                        if high_surrogate.is_some() {
                            return Err(invalid("expected low surrogate char"));
                        }
                        char::from_u32(cu as u32).ok_or_else(|| invalid("invalid unicode sequence"))?
                    };
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    self.check_string_growth(out.len())?;
                    continue;
                }
                let idx = ESCAPE_CHARS
                    .iter()
                    .position(|&c| c == esc)
                    .ok_or_else(|| invalid("expected control char"))?;
                ch = ESCAPE_CHAR_VALS.get(idx).copied().unwrap_or(esc);
            }
            if high_surrogate.is_some() {
                return Err(invalid("expected low surrogate char"));
            }
            out.push(ch);
            self.check_string_growth(out.len())?;
        }
        if high_surrogate.is_some() {
            return Err(invalid("expected low surrogate char"));
        }
        Ok(out)
    }

    fn check_string_growth(&self, len: usize) -> Result<()> {
        match self.limits.string_limit {
            Some(max) if len > max => Err(WireError::protocol(
                ProtocolErrorKind::SizeLimit,
                format!("string length exceeds max allowed {max}"),
            )),
            _ => Ok(()),
        }
    }

    fn read_json_numeric_chars(&mut self) -> Result<String> {
        let mut s = String::new();
        while is_json_numeric(self.peek()?) {
            s.push(self.next_byte()? as char);
        }
        Ok(s)
    }

    fn read_json_integer(&mut self) -> Result<i64> {
        self.context_read()?;
        let quoted = self.context.escape_num();
        if quoted {
            self.read_syntax_char(b'"')?;
        }
        let s = self.read_json_numeric_chars()?;
        if quoted {
            self.read_syntax_char(b'"')?;
        }
        s.parse::<i64>()
            .map_err(|_| invalid("bad data encountered in numeric data"))
    }

    fn read_json_double(&mut self) -> Result<f64> {
        self.context_read()?;
        if self.peek()? == b'"' {
            let raw = self.read_json_string(true)?;
            let v = utf8(raw)?
                .parse::<f64>()
                .map_err(|_| invalid("bad data encountered in numeric data"))?;
            if !self.context.escape_num() && v.is_finite() {
                return Err(invalid("numeric data unexpectedly quoted"));
            }
            Ok(v)
        } else {
            if self.context.escape_num() {
                // A key must be quoted; this fails with the offending byte.
                self.read_syntax_char(b'"')?;
            }
            self.read_json_numeric_chars()?
                .parse::<f64>()
                .map_err(|_| invalid("bad data encountered in numeric data"))
        }
    }

    fn read_json_base64(&mut self) -> Result<Vec<u8>> {
        let mut raw = self.read_json_string(false)?;
        let mut pad = 0;
        while pad < 2 && raw.last() == Some(&b'=') {
            raw.pop();
            pad += 1;
        }
        // A single leftover char is not valid base64, but tolerated so that
        // plain strings can be skipped as binary.
        if raw.len() % 4 == 1 {
            raw.pop();
        }
        BASE64
            .decode(&raw)
            .map_err(|e| invalid(&format!("invalid base64: {e}")))
    }

    fn read_json_object_start(&mut self) -> Result<()> {
        self.context_read()?;
        self.read_syntax_char(b'{')?;
        self.push_context(Context::Pair {
            first: true,
            colon: true,
        });
        Ok(())
    }

    fn read_json_object_end(&mut self) -> Result<()> {
        self.read_syntax_char(b'}')?;
        self.pop_context()
    }

    fn read_json_array_start(&mut self) -> Result<()> {
        self.context_read()?;
        self.read_syntax_char(b'[')?;
        self.push_context(Context::List { first: true });
        Ok(())
    }

    fn read_json_array_end(&mut self) -> Result<()> {
        self.read_syntax_char(b']')?;
        self.pop_context()
    }

    fn read_type_name(&mut self) -> Result<TType> {
        let name = self.read_json_string(false)?;
        type_for_name(&name)
    }

    fn read_container_size(&mut self, min_elem: usize) -> Result<usize> {
        let size = self.read_json_integer()?;
        check_length(&self.trans, size, self.limits.container_limit, min_elem)
    }
}

impl<T: Transport> WireCodec for JsonCodec<T> {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        self.reset_context();
        self.write_json_array_start()?;
        self.write_json_integer(VERSION)?;
        self.write_json_string(header.name.as_bytes())?;
        self.write_json_integer(header.message_type.as_u8() as i64)?;
        self.write_json_integer(header.seq_id as i64)
    }

    fn write_message_end(&mut self) -> Result<()> {
        self.write_json_array_end()
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        self.write_json_object_start()
    }

    fn write_struct_end(&mut self) -> Result<()> {
        self.write_json_object_end()
    }

    fn write_field_begin(&mut self, name: &str, field_type: TType, id: i16) -> Result<()> {
        if self.field_names_as_string {
            self.write_json_string(name.as_bytes())?;
        } else {
            self.write_json_integer(id as i64)?;
        }
        self.write_json_object_start()?;
        self.write_json_string(type_name(field_type)?)
    }

    fn write_field_end(&mut self) -> Result<()> {
        self.write_json_object_end()
    }

    fn write_field_stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_map_begin(&mut self, header: &MapHeader) -> Result<()> {
        self.write_json_array_start()?;
        self.write_json_string(type_name(header.key_type)?)?;
        self.write_json_string(type_name(header.value_type)?)?;
        self.write_json_integer(header.size as i64)?;
        self.write_json_object_start()
    }

    fn write_map_end(&mut self) -> Result<()> {
        self.write_json_object_end()?;
        self.write_json_array_end()
    }

    fn write_list_begin(&mut self, header: &ListHeader) -> Result<()> {
        self.write_json_array_start()?;
        self.write_json_string(type_name(header.elem_type)?)?;
        self.write_json_integer(header.size as i64)
    }

    fn write_list_end(&mut self) -> Result<()> {
        self.write_json_array_end()
    }

    fn write_set_begin(&mut self, header: &SetHeader) -> Result<()> {
        self.write_json_array_start()?;
        self.write_json_string(type_name(header.elem_type)?)?;
        self.write_json_integer(header.size as i64)
    }

    fn write_set_end(&mut self) -> Result<()> {
        self.write_json_array_end()
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_json_integer(if v { 1 } else { 0 })
    }

    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.write_json_integer(v as i64)
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_json_integer(v as i64)
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_json_integer(v as i64)
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_json_integer(v)
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.write_json_double(v)
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_json_string(v.as_bytes())
    }

    fn write_binary(&mut self, v: &[u8]) -> Result<()> {
        self.context_write()?;
        let encoded = BASE64.encode(v);
        let mut out = Vec::with_capacity(encoded.len() + 2);
        out.push(b'"');
        out.extend_from_slice(encoded.as_bytes());
        out.push(b'"');
        self.trans.write(&out)
    }

    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        self.reset_context();
        self.read_json_array_start()?;
        if self.read_json_integer()? != VERSION {
            return Err(WireError::protocol(
                ProtocolErrorKind::BadVersion,
                "message contained bad version",
            ));
        }
        let name = utf8(self.read_json_string(false)?)?;
        let message_type =
            MessageType::from_u8(narrow(self.read_json_integer()?, "message type")?)?;
        let seq_id = narrow(self.read_json_integer()?, "sequence id")?;
        Ok(MessageHeader {
            name,
            message_type,
            seq_id,
        })
    }

    fn read_message_end(&mut self) -> Result<()> {
        self.read_json_array_end()?;
        self.trans.end_message();
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        self.read_json_object_start()
    }

    fn read_struct_end(&mut self) -> Result<()> {
        self.read_json_object_end()
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        if self.peek()? == b'}' {
            return Ok(FieldHeader {
                field_type: TType::Stop,
                id: 0,
            });
        }
        let id = narrow(self.read_json_integer()?, "field id")?;
        self.read_json_object_start()?;
        let field_type = self.read_type_name()?;
        Ok(FieldHeader { field_type, id })
    }

    fn read_field_end(&mut self) -> Result<()> {
        self.read_json_object_end()
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        self.read_json_array_start()?;
        let key_type = self.read_type_name()?;
        let value_type = self.read_type_name()?;
        let min = self.min_serialized_size(key_type) + self.min_serialized_size(value_type);
        let size = self.read_container_size(min)?;
        self.read_json_object_start()?;
        Ok(MapHeader {
            key_type,
            value_type,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        self.read_json_object_end()?;
        self.read_json_array_end()
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        self.read_json_array_start()?;
        let elem_type = self.read_type_name()?;
        let size = self.read_container_size(self.min_serialized_size(elem_type))?;
        Ok(ListHeader { elem_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        self.read_json_array_end()
    }

    fn read_set_begin(&mut self) -> Result<SetHeader> {
        self.read_json_array_start()?;
        let elem_type = self.read_type_name()?;
        let size = self.read_container_size(self.min_serialized_size(elem_type))?;
        Ok(SetHeader { elem_type, size })
    }

    fn read_set_end(&mut self) -> Result<()> {
        self.read_json_array_end()
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_json_integer()? != 0)
    }

    fn read_byte(&mut self) -> Result<i8> {
        narrow(self.read_json_integer()?, "i8")
    }

    fn read_i16(&mut self) -> Result<i16> {
        narrow(self.read_json_integer()?, "i16")
    }

    fn read_i32(&mut self) -> Result<i32> {
        narrow(self.read_json_integer()?, "i32")
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.read_json_integer()
    }

    fn read_double(&mut self) -> Result<f64> {
        self.read_json_double()
    }

    fn read_string(&mut self) -> Result<String> {
        utf8(self.read_json_string(false)?)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        self.read_json_base64()
    }

    fn skip_string(&mut self) -> Result<()> {
        self.read_json_string(false).map(drop)
    }

    fn limits(&self) -> CodecLimits {
        self.limits
    }

    fn min_serialized_size(&self, ty: TType) -> usize {
        match ty {
            TType::Stop | TType::Void => 0,
            TType::Bool | TType::Byte | TType::Double | TType::I16 | TType::I32 | TType::I64 => 1,
            TType::String | TType::Struct | TType::Map | TType::Set | TType::List => 2,
        }
    }

    fn transport(&mut self) -> &mut dyn Transport {
        &mut self.trans
    }

    fn reset(&mut self) {
        self.reset_context();
        self.lookahead = None;
    }
}
