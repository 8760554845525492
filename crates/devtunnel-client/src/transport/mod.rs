//! Broker transport: handshake and the persistent tunnel client.

pub mod client;
pub mod handshake;

pub use client::{ClientOptions, MessageListener, TunnelClient};
