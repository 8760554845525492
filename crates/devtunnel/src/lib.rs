//! Top-level facade crate for devtunnel.
//!
//! Re-exports the wire contracts and the client runtime so users can depend on a single crate.

pub mod core {
    pub use devtunnel_core::*;
}

pub mod client {
    pub use devtunnel_client::*;
}
