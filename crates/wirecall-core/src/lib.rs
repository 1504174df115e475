//! wirecall core: wire codecs, transports, and the struct/union data model.
//!
//! This crate holds everything needed to put a typed message on a byte stream
//! and take it back off: the Binary, Compact and JSON codecs, the framing and
//! memory transports, the skip utility, and the descriptor-driven struct model.
//! It carries no async runtime so it can be embedded in blocking clients,
//! servers, and test harnesses alike.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Every length or count read off the wire is validated before anything is
//! allocated for it, and malformed input surfaces as `WireError`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod transport;

/// Shared result type.
pub use error::{Result, WireError};
