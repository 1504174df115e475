use std::sync::Arc;

use wirecall_core::model::{DynamicStruct, FieldType, StructDescriptor, Value};

use crate::dispatch::{FnHandler, HandlerError, Processor};

pub const ECHO: &str = "echo";
pub const PING: &str = "ping";

pub fn echo_args() -> Arc<StructDescriptor> {
    StructDescriptor::new("echo_args")
        .required(1, "message", FieldType::String)
        .build()
}

pub fn echo_result() -> Arc<StructDescriptor> {
    StructDescriptor::new("echo_result")
        .optional(0, "success", FieldType::String)
        .build()
}

fn ping_args() -> Arc<StructDescriptor> {
    StructDescriptor::new("ping_args").build()
}

/// Register `echo` (returns its argument) and `ping` (oneway, logs only).
pub fn register_builtin(processor: &Processor) {
    let result_desc = echo_result();
    processor.register(Arc::new(FnHandler::new(ECHO, echo_args(), move |args: DynamicStruct| {
        let result_desc = Arc::clone(&result_desc);
        async move {
            let message = args.get(1).cloned().unwrap_or_else(|| Value::from(""));
            let result = DynamicStruct::new(result_desc).with(0, message)?;
            Ok::<_, HandlerError>(result)
        }
    })));

    processor.register(Arc::new(FnHandler::oneway(PING, ping_args(), |_args: DynamicStruct| async {
        tracing::debug!("ping");
        Ok::<_, HandlerError>(DynamicStruct::new(ping_args()))
    })));
}
