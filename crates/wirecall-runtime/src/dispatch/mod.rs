//! Method dispatch: the processor and the per-method handler contract.

pub mod function;
pub mod processor;

pub use function::{CallArgs, FnHandler, HandlerError, HandlerResult, ProcessFunction};
pub use processor::{Outcome, Processor, ProcessorOptions};
