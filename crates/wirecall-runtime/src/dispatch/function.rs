use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use wirecall_core::error::{Result, WireError};
use wirecall_core::model::{ApplicationException, DynamicStruct, StructDescriptor, WireStruct};
use wirecall_core::protocol::WireCodec;

/// Ways a handler can fail.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Connection-level failure; the connection is torn down.
    #[error("transport failure: {0}")]
    Transport(WireError),
    /// Sent back to the caller as an EXCEPTION reply.
    #[error("application exception: {0}")]
    Application(ApplicationException),
    /// Anything else. Reported as INTERNAL_ERROR unless the processor is set
    /// to rethrow.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<ApplicationException> for HandlerError {
    fn from(ex: ApplicationException) -> Self {
        HandlerError::Application(ex)
    }
}

impl From<WireError> for HandlerError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Transport { .. } => HandlerError::Transport(e),
            WireError::Application(ex) => HandlerError::Application(ex),
            other => HandlerError::Internal(other.to_string()),
        }
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// One callable method.
///
/// Arguments are decoded synchronously off the request, then the handler
/// runs. The returned struct is written as the REPLY body; declared
/// exceptions travel inside it as ordinary result fields.
#[async_trait]
pub trait ProcessFunction: Send + Sync {
    fn method(&self) -> &str;

    fn is_oneway(&self) -> bool {
        false
    }

    fn read_args(&self, codec: &mut dyn WireCodec) -> Result<CallArgs>;

    async fn call(&self, args: CallArgs) -> HandlerResult<Box<dyn WireStruct>>;
}

/// Decoded arguments, opaque to the processor.
pub type CallArgs = Box<dyn Any + Send>;

/// Descriptor-driven handler over `DynamicStruct` args and results.
pub struct FnHandler<F, Fut> {
    method: String,
    oneway: bool,
    args: Arc<StructDescriptor>,
    handler: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(DynamicStruct) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<DynamicStruct>> + Send + 'static,
{
    pub fn new(method: impl Into<String>, args: Arc<StructDescriptor>, handler: F) -> Self {
        Self {
            method: method.into(),
            oneway: false,
            args,
            handler,
            _fut: PhantomData,
        }
    }

    /// Same as `new`, but the caller expects no reply.
    pub fn oneway(method: impl Into<String>, args: Arc<StructDescriptor>, handler: F) -> Self {
        Self {
            oneway: true,
            ..Self::new(method, args, handler)
        }
    }
}

#[async_trait]
impl<F, Fut> ProcessFunction for FnHandler<F, Fut>
where
    F: Fn(DynamicStruct) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<DynamicStruct>> + Send + 'static,
{
    fn method(&self) -> &str {
        &self.method
    }

    fn is_oneway(&self) -> bool {
        self.oneway
    }

    fn read_args(&self, codec: &mut dyn WireCodec) -> Result<CallArgs> {
        let mut args = DynamicStruct::new(Arc::clone(&self.args));
        args.read(codec)?;
        Ok(Box::new(args))
    }

    async fn call(&self, args: CallArgs) -> HandlerResult<Box<dyn WireStruct>> {
        let args = args.downcast::<DynamicStruct>().map_err(|_| {
            HandlerError::Internal(format!("{}: unexpected argument type", self.method))
        })?;
        let result = (self.handler)(*args).await?;
        Ok(Box::new(result))
    }
}
