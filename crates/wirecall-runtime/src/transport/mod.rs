//! Network surfaces for the processor.
//!
//! - `server`: TCP listener, one task per connection, framed or buffered.
//! - `http`: `POST /rpc` carrying one message per request body.
//! - `codec`: codec stacks over fully buffered messages.

pub mod codec;
pub mod http;
pub mod server;

pub use codec::CodecSpec;
pub use server::{NoopEvents, Server, ServerEventHandler, ShutdownHandle};
