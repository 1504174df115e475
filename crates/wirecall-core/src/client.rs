//! Blocking request/response client over one codec.

use crate::error::{Result, WireError};
use crate::model::{ApplicationErrorKind, ApplicationException, DynamicStruct, Value, WireStruct};
use crate::protocol::{MessageHeader, MessageType, WireCodec};

/// Id of the `success` slot in a generated-style result struct.
pub const SUCCESS_FIELD: i16 = 0;

pub struct ServiceClient<C> {
    codec: C,
    seq_id: i32,
}

impl<C: WireCodec> ServiceClient<C> {
    pub fn new(codec: C) -> Self {
        Self { codec, seq_id: 0 }
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    pub fn into_inner(self) -> C {
        self.codec
    }

    /// Sequence id of the last message sent.
    pub fn seq_id(&self) -> i32 {
        self.seq_id
    }

    pub fn send(&mut self, method: &str, args: &dyn WireStruct) -> Result<()> {
        self.send_message(method, args, MessageType::Call)
    }

    pub fn send_oneway(&mut self, method: &str, args: &dyn WireStruct) -> Result<()> {
        self.send_message(method, args, MessageType::Oneway)
    }

    fn send_message(&mut self, method: &str, args: &dyn WireStruct, ty: MessageType) -> Result<()> {
        self.seq_id = self.seq_id.wrapping_add(1);
        let header = MessageHeader::new(method, ty, self.seq_id);
        tracing::trace!(method, seq_id = self.seq_id, "sending request");
        self.codec.write_message_begin(&header)?;
        args.write(&mut self.codec)?;
        self.codec.write_message_end()?;
        self.codec.flush()
    }

    /// Read the reply to the last `send` into `result`.
    ///
    /// An EXCEPTION reply surfaces as [`WireError::Application`]. A reply for
    /// another sequence id or method is rejected before its body is read.
    pub fn receive(&mut self, method: &str, result: &mut dyn WireStruct) -> Result<()> {
        let header = self.codec.read_message_begin()?;
        if header.message_type == MessageType::Exception {
            let ex = ApplicationException::read_from(&mut self.codec)?;
            self.codec.read_message_end()?;
            return Err(ex.into());
        }
        if header.seq_id != self.seq_id {
            return Err(WireError::application(
                ApplicationErrorKind::BadSequenceId,
                format!(
                    "{method} failed: out of sequence response: expected {} but got {}",
                    self.seq_id, header.seq_id
                ),
            ));
        }
        if header.name != method {
            return Err(WireError::application(
                ApplicationErrorKind::WrongMethodName,
                format!("{method} failed: wrong method name in reply: {}", header.name),
            ));
        }
        result.read(&mut self.codec)?;
        self.codec.read_message_end()
    }

    pub fn call(
        &mut self,
        method: &str,
        args: &dyn WireStruct,
        result: &mut dyn WireStruct,
    ) -> Result<()> {
        self.send(method, args)?;
        self.receive(method, result)
    }
}

/// Pull the `success` value out of a result struct, failing with
/// `MISSING_RESULT` when the server set nothing.
pub fn success_value(method: &str, result: &DynamicStruct) -> Result<Value> {
    result.get(SUCCESS_FIELD).cloned().ok_or_else(|| {
        WireError::application(
            ApplicationErrorKind::MissingResult,
            format!("{method} failed: unknown result"),
        )
    })
}
