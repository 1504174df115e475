//! wirecall runtime library entry.
//!
//! Puts the core codecs to work: the method processor and its handler
//! contract, the TCP and HTTP servers, the async call engine, strict YAML
//! config, and Prometheus-style metrics. Consumed by the `wirecall-server`
//! binary and by integration tests.

pub mod app_state;
pub mod async_call;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod ops;
pub mod router;
pub mod services;
pub mod transport;
