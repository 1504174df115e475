//! Built-in services.

pub mod echo;

pub use echo::{echo_args, echo_result, register_builtin, ECHO, PING};
