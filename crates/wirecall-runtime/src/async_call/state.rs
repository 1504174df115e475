//! Per-call state machine.
//!
//! `transition` is pure: it maps the current state and the event the I/O
//! layer observed to the next state and the effect to perform. Terminal
//! states absorb every further event, which is what keeps completion
//! delivery to exactly once.

use std::time::Duration;

use wirecall_core::error::{TransportErrorKind, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Connecting,
    WritingRequestSize,
    WritingRequestBody,
    ReadingResponseSize,
    ReadingResponseBody,
    ResponseRead,
    Error,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::ResponseRead | CallState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Connecting => "CONNECTING",
            CallState::WritingRequestSize => "WRITING_REQUEST_SIZE",
            CallState::WritingRequestBody => "WRITING_REQUEST_BODY",
            CallState::ReadingResponseSize => "READING_RESPONSE_SIZE",
            CallState::ReadingResponseBody => "READING_RESPONSE_BODY",
            CallState::ResponseRead => "RESPONSE_READ",
            CallState::Error => "ERROR",
        }
    }
}

/// What the I/O layer observed.
#[derive(Debug)]
pub enum Event {
    Connected,
    RequestSizeWritten,
    RequestBodyWritten,
    ResponseSizeRead(i32),
    ResponseBodyRead,
    Failed(WireError),
    /// Deadline passed; carries the time since the call was created.
    TimedOut(Duration),
}

/// What the engine must do next.
#[derive(Debug)]
pub enum Effect {
    WriteRequestSize,
    WriteRequestBody,
    ReadResponseSize,
    ReadResponseBody(usize),
    /// Deliver the response (none for oneway calls).
    Complete,
    Fail(WireError),
    /// Event arrived after the call finished.
    Ignore,
}

/// Fixed properties of a call that steer its transitions.
#[derive(Debug, Clone, Copy)]
pub struct CallShape {
    pub oneway: bool,
    pub max_frame_size: usize,
}

pub fn transition(state: CallState, event: Event, shape: CallShape) -> (CallState, Effect) {
    use CallState::*;

    if state.is_terminal() {
        return (state, Effect::Ignore);
    }

    match (state, event) {
        (_, Event::Failed(e)) => (Error, Effect::Fail(e)),
        (_, Event::TimedOut(elapsed)) => (
            Error,
            Effect::Fail(WireError::transport(
                TransportErrorKind::TimedOut,
                format!(
                    "operation timed out after {} ms in state {}",
                    elapsed.as_millis(),
                    state.as_str()
                ),
            )),
        ),
        (Connecting, Event::Connected) => (WritingRequestSize, Effect::WriteRequestSize),
        (WritingRequestSize, Event::RequestSizeWritten) => {
            (WritingRequestBody, Effect::WriteRequestBody)
        }
        (WritingRequestBody, Event::RequestBodyWritten) if shape.oneway => {
            (ResponseRead, Effect::Complete)
        }
        (WritingRequestBody, Event::RequestBodyWritten) => {
            (ReadingResponseSize, Effect::ReadResponseSize)
        }
        (ReadingResponseSize, Event::ResponseSizeRead(size)) => {
            if size < 0 {
                return (
                    Error,
                    Effect::Fail(WireError::transport(
                        TransportErrorKind::CorruptedData,
                        format!("Read a negative frame size ({size})"),
                    )),
                );
            }
            let size = size as usize;
            if size > shape.max_frame_size {
                return (
                    Error,
                    Effect::Fail(WireError::transport(
                        TransportErrorKind::CorruptedData,
                        format!(
                            "Frame size ({size}) larger than max length ({})",
                            shape.max_frame_size
                        ),
                    )),
                );
            }
            (ReadingResponseBody, Effect::ReadResponseBody(size))
        }
        (ReadingResponseBody, Event::ResponseBodyRead) => (ResponseRead, Effect::Complete),
        (state, event) => (
            Error,
            Effect::Fail(WireError::IllegalState(format!(
                "unexpected {event:?} in state {}",
                state.as_str()
            ))),
        ),
    }
}
