//! Routes one request message to its handler and produces the reply bytes.
//!
//! The whole request is buffered before it gets here, so a failed argument
//! decode never leaves a half-read stream behind, and a reply that fails to
//! encode is dropped in favor of an INTERNAL_ERROR exception.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;

use wirecall_core::error::{Result, WireError};
use wirecall_core::model::{ApplicationErrorKind, ApplicationException, WireStruct};
use wirecall_core::protocol::{skip, MessageHeader, MessageType, TType, WireCodec};

use crate::config::ServerSection;
use crate::dispatch::function::{CallArgs, HandlerError, ProcessFunction};
use crate::obs::RpcMetrics;
use crate::transport::codec::CodecSpec;

#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    /// Close the connection after replying PROTOCOL_ERROR.
    pub close_on_protocol_error: bool,
    /// Return unexpected handler failures as errors instead of replying
    /// INTERNAL_ERROR.
    pub rethrow_unhandled: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            close_on_protocol_error: true,
            rethrow_unhandled: false,
        }
    }
}

impl From<&ServerSection> for ProcessorOptions {
    fn from(server: &ServerSection) -> Self {
        Self {
            close_on_protocol_error: server.close_on_protocol_error,
            rethrow_unhandled: server.rethrow_unhandled,
        }
    }
}

/// Result of processing one request.
#[derive(Debug)]
pub struct Outcome {
    pub method: String,
    pub seq_id: i32,
    /// Encoded reply message; `None` for oneway calls.
    pub reply: Option<Bytes>,
    /// The arguments could not be decoded.
    pub protocol_error: bool,
    /// Close the connection once `reply` is written.
    pub close: bool,
}

enum Decoded {
    Call {
        header: MessageHeader,
        function: Arc<dyn ProcessFunction>,
        args: CallArgs,
    },
    Reject {
        header: MessageHeader,
        exception: ApplicationException,
        protocol_error: bool,
    },
}

/// Method-name keyed handler registry.
pub struct Processor {
    functions: DashMap<String, Arc<dyn ProcessFunction>>,
    spec: CodecSpec,
    options: ProcessorOptions,
    metrics: Arc<RpcMetrics>,
}

impl Processor {
    pub fn new(spec: CodecSpec) -> Self {
        Self {
            functions: DashMap::new(),
            spec,
            options: ProcessorOptions::default(),
            metrics: Arc::new(RpcMetrics::default()),
        }
    }

    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RpcMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn spec(&self) -> &CodecSpec {
        &self.spec
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    pub fn metrics(&self) -> Arc<RpcMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn register(&self, function: Arc<dyn ProcessFunction>) {
        self.functions.insert(function.method().to_string(), function);
    }

    pub fn registered_methods(&self) -> Vec<String> {
        self.functions.iter().map(|e| e.key().clone()).collect()
    }

    /// Handle one complete request message.
    ///
    /// Errors mean the connection can no longer be trusted: a broken message
    /// header, a transport failure raised by a handler, or an unhandled
    /// failure with `rethrow_unhandled` set.
    pub async fn process(&self, request: Bytes) -> Result<Outcome> {
        let started = Instant::now();
        let decoded = self
            .spec
            .decode(request, |codec| self.decode_request(codec))
            .map_err(|e| {
                self.metrics
                    .processor_errors
                    .inc(&[("code", e.code().as_str())]);
                e
            })?;

        let outcome = match decoded {
            Decoded::Reject {
                header,
                exception,
                protocol_error,
            } => {
                tracing::debug!(method = %header.name, seq_id = header.seq_id, error = %exception, "request rejected");
                self.metrics
                    .processor_errors
                    .inc(&[("code", exception.kind.code_str())]);
                let reply = self.encode_reply(&header, MessageType::Exception, &exception)?;
                Outcome {
                    close: protocol_error && self.options.close_on_protocol_error,
                    method: header.name,
                    seq_id: header.seq_id,
                    reply: Some(reply),
                    protocol_error,
                }
            }
            Decoded::Call {
                header,
                function,
                args,
            } => self.invoke(header, function, args).await?,
        };

        self.metrics
            .dispatch_duration
            .observe(&[("method", outcome.method.as_str())], started.elapsed());
        Ok(outcome)
    }

    fn decode_request(&self, codec: &mut dyn WireCodec) -> Result<Decoded> {
        let header = codec.read_message_begin()?;

        if !matches!(header.message_type, MessageType::Call | MessageType::Oneway) {
            skip(codec, TType::Struct)?;
            codec.read_message_end()?;
            let exception = ApplicationException::new(
                ApplicationErrorKind::InvalidMessageType,
                format!("unexpected message type for '{}'", header.name),
            );
            return Ok(Decoded::Reject {
                header,
                exception,
                protocol_error: false,
            });
        }

        let Some(function) = self
            .functions
            .get(&header.name)
            .map(|e| Arc::clone(e.value()))
        else {
            skip(codec, TType::Struct)?;
            codec.read_message_end()?;
            let exception = ApplicationException::new(
                ApplicationErrorKind::UnknownMethod,
                format!("Invalid method name: '{}'", header.name),
            );
            return Ok(Decoded::Reject {
                header,
                exception,
                protocol_error: false,
            });
        };

        let args = function.read_args(codec).and_then(|args| {
            codec.read_message_end()?;
            Ok(args)
        });
        match args {
            Ok(args) => Ok(Decoded::Call {
                header,
                function,
                args,
            }),
            Err(e) if e.is_protocol() => Ok(Decoded::Reject {
                exception: ApplicationException::new(
                    ApplicationErrorKind::ProtocolError,
                    e.to_string(),
                ),
                header,
                protocol_error: true,
            }),
            Err(e) => Err(e),
        }
    }

    async fn invoke(
        &self,
        header: MessageHeader,
        function: Arc<dyn ProcessFunction>,
        args: CallArgs,
    ) -> Result<Outcome> {
        let oneway = header.message_type == MessageType::Oneway || function.is_oneway();
        let method = header.name.as_str();
        tracing::debug!(method, seq_id = header.seq_id, oneway, "dispatching");

        let (reply, label) = match function.call(args).await {
            Ok(_) if oneway => (None, "oneway"),
            Ok(result) => match self.encode_reply(&header, MessageType::Reply, result.as_ref()) {
                Ok(reply) => (Some(reply), "reply"),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    tracing::error!(method, error = %e, "failed to encode result");
                    (self.internal_error(&header, oneway)?, "internal_error")
                }
            },
            Err(HandlerError::Transport(e)) => {
                self.metrics
                    .processor_errors
                    .inc(&[("code", e.code().as_str())]);
                return Err(e);
            }
            Err(HandlerError::Application(ex)) if oneway => {
                tracing::warn!(method, error = %ex, "oneway handler raised");
                (None, "exception")
            }
            Err(HandlerError::Application(ex)) => (
                Some(self.encode_reply(&header, MessageType::Exception, &ex)?),
                "exception",
            ),
            Err(HandlerError::Internal(msg)) => {
                tracing::error!(method, error = %msg, "handler failed");
                self.metrics
                    .processor_errors
                    .inc(&[("code", ApplicationErrorKind::InternalError.code_str())]);
                if self.options.rethrow_unhandled {
                    return Err(WireError::application(
                        ApplicationErrorKind::InternalError,
                        msg,
                    ));
                }
                (self.internal_error(&header, oneway)?, "internal_error")
            }
        };

        self.metrics
            .requests
            .inc(&[("method", method), ("outcome", label)]);
        Ok(Outcome {
            method: header.name.clone(),
            seq_id: header.seq_id,
            reply,
            protocol_error: false,
            close: false,
        })
    }

    fn internal_error(&self, header: &MessageHeader, oneway: bool) -> Result<Option<Bytes>> {
        if oneway {
            return Ok(None);
        }
        let ex = ApplicationException::new(
            ApplicationErrorKind::InternalError,
            format!("Internal error processing {}", header.name),
        );
        self.encode_reply(header, MessageType::Exception, &ex)
            .map(Some)
    }

    fn encode_reply(
        &self,
        request: &MessageHeader,
        message_type: MessageType,
        body: &dyn WireStruct,
    ) -> Result<Bytes> {
        let header = MessageHeader::new(request.name.as_str(), message_type, request.seq_id);
        self.spec.encode(|codec| {
            codec.write_message_begin(&header)?;
            body.write(codec)?;
            codec.write_message_end()
        })
    }
}
