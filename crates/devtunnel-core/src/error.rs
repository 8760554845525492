//! Shared error type across devtunnel crates.

use thiserror::Error;

/// Stable error codes (used in logs and process exit mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed frame or payload.
    Decode,
    /// Message could not be serialized.
    Encode,
    /// No live connection.
    NotConnected,
    /// Socket exists but is not writable.
    NotReady,
    /// Caller-side deadline elapsed.
    Timeout,
    /// Connection dropped while a request was outstanding.
    ConnectionClosed,
    /// Broker refused or never completed the handshake.
    Handshake,
    /// Underlying write failed.
    Send,
    /// Invalid startup configuration.
    Config,
    /// Runtime lifecycle is inactive.
    RuntimeNotActive,
    /// Runtime lifecycle is already active.
    RuntimeAlreadyActive,
    /// Execution backend failure outside an invocation.
    Invoker,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and error payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Decode => "DECODE",
            ErrorCode::Encode => "ENCODE",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::NotReady => "NOT_READY",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::Handshake => "HANDSHAKE",
            ErrorCode::Send => "SEND",
            ErrorCode::Config => "CONFIG",
            ErrorCode::RuntimeNotActive => "RUNTIME_NOT_ACTIVE",
            ErrorCode::RuntimeAlreadyActive => "RUNTIME_ALREADY_ACTIVE",
            ErrorCode::Invoker => "INVOKER",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Unified error type used by core and client.
///
/// `Clone` so a single connect attempt can report the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("not connected")]
    NotConnected,
    #[error("not ready")]
    NotReady,
    #[error("timeout after {0} milliseconds")]
    Timeout(u64),
    #[error("connection is closed (code={code}, reason={reason})")]
    ConnectionClosed { code: i32, reason: String },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("runtime is not active")]
    RuntimeNotActive,
    #[error("runtime is already active")]
    RuntimeAlreadyActive,
    #[error("invoker failed: {0}")]
    Invoker(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl TunnelError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            TunnelError::Decode(_) => ErrorCode::Decode,
            TunnelError::Encode(_) => ErrorCode::Encode,
            TunnelError::NotConnected => ErrorCode::NotConnected,
            TunnelError::NotReady => ErrorCode::NotReady,
            TunnelError::Timeout(_) => ErrorCode::Timeout,
            TunnelError::ConnectionClosed { .. } => ErrorCode::ConnectionClosed,
            TunnelError::Handshake(_) => ErrorCode::Handshake,
            TunnelError::Send(_) => ErrorCode::Send,
            TunnelError::Config(_) => ErrorCode::Config,
            TunnelError::RuntimeNotActive => ErrorCode::RuntimeNotActive,
            TunnelError::RuntimeAlreadyActive => ErrorCode::RuntimeAlreadyActive,
            TunnelError::Invoker(_) => ErrorCode::Invoker,
            TunnelError::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_closed_carries_code_and_reason() {
        let err = TunnelError::ConnectionClosed {
            code: 1006,
            reason: "abnormal".into(),
        };
        assert_eq!(err.code().as_str(), "CONNECTION_CLOSED");
        assert_eq!(
            err.to_string(),
            "connection is closed (code=1006, reason=abnormal)"
        );
    }
}
