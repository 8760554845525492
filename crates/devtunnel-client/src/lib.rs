//! devtunnel client library entry.
//!
//! This crate wires the broker transport, the message dispatcher, the
//! invocation router and the execution backends into the tunnel process.
//! It is consumed by the binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod app_state;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod exit;
pub mod handlers;
pub mod invoke;
pub mod logging;
pub mod runtime;
pub mod transport;
pub mod watch;
