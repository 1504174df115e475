//! Non-blocking method calls multiplexed over one event-loop thread.
//!
//! - `state`: the per-call state machine (pure transitions).
//! - `channel`: the non-blocking byte channel contract and a TCP channel.
//! - `call`: a fully encoded request plus its completion.
//! - `manager`: the loop thread, submission queue and deadline ordering.
//! - `client`: the per-connection client users issue calls through.

pub mod call;
pub mod channel;
pub mod client;
pub mod manager;
pub mod state;

pub use call::MethodCall;
pub use channel::{NonblockingChannel, TcpChannel};
pub use client::{AsyncClient, ClientFault};
pub use manager::ClientManager;
pub use state::{transition, CallShape, CallState, Effect, Event};
