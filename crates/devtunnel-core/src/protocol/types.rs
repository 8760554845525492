//! Message types and handshake constants.

/// Role marker prepended to the connection name in the handshake header.
pub const CLIENT_CONNECTION_NAME_PREFIX: &str = "client::";
/// Connection type this process reports as the source of its responses.
pub const CLIENT_CONNECTION_TYPE: &str = "client";
/// Connection name used when none is configured.
pub const DEFAULT_CONNECTION_NAME: &str = "default";

/// Handshake header carrying the role-prefixed connection name.
pub const CONNECTION_NAME_HEADER: &str = "x-api-key";
/// Handshake header carrying the optional credential.
pub const CREDENTIAL_HEADER: &str = "x-api-token";

/// Max serialized payload bytes per frame before fragmenting.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Broker error subtype: our previous response could not be forwarded
/// because its target is gone (the invocation already finished).
pub const BROKER_ERROR_FORWARD_FAILED: &str = "FORWARD_FAILED";

/// Closed set of message types exchanged with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientPing,
    ClientPong,
    ClientRequest,
    ClientResponse,
    ClientDisconnect,
    ClientError,
    ClientConnectionOverride,
    BrokerError,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::ClientPing,
        MessageType::ClientPong,
        MessageType::ClientRequest,
        MessageType::ClientResponse,
        MessageType::ClientDisconnect,
        MessageType::ClientError,
        MessageType::ClientConnectionOverride,
        MessageType::BrokerError,
    ];

    /// Wire tag (`type` field of the envelope).
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ClientPing => "client.ping",
            MessageType::ClientPong => "client.pong",
            MessageType::ClientRequest => "client.request",
            MessageType::ClientResponse => "client.response",
            MessageType::ClientDisconnect => "client.disconnect",
            MessageType::ClientError => "client.error",
            MessageType::ClientConnectionOverride => "client.connectionOverride",
            MessageType::BrokerError => "broker.error",
        }
    }

    /// Exact-match lookup; unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
