//! devtunnel core: transport-agnostic wire contracts shared by the tunnel
//! client and its tooling.
//!
//! This crate defines the broker envelope, the decoded message, the
//! fragmenting codec, the invocation domain types and the error surface. It
//! carries no runtime or socket dependencies so the codec can be tested and
//! reused without a live connection.
//!
//! # Guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed frames surface as `TunnelError::Decode` so a single bad frame
//! never takes the process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod invocation;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, Result, TunnelError};
