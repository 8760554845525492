//! Broker wire protocol.
//!
//! - `envelope`: the JSON frame actually written to the socket, the decoded
//!   payload, and the post-reassembly `Message`.
//! - `types`: message-type taxonomy and handshake constants.
//! - `codec`: payload fragmentation on encode, reassembly on receive.
//!
//! Decoding never panics: malformed frames are reported as
//! `TunnelError::Decode` and dropped by the caller.

pub mod codec;
pub mod envelope;
pub mod types;

pub use codec::{decode, encode, parse_frame, to_frame, Reassembler};
pub use envelope::{Envelope, ErrorInfo, Message, Payload, NO_FRAGMENT};
pub use types::MessageType;
