//! Top-level facade crate for wirecall.
//!
//! Re-exports the core codecs and the runtime so users can depend on a single crate.

pub mod core {
    pub use wirecall_core::*;
}

pub mod runtime {
    pub use wirecall_runtime::*;
}
