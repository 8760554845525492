use std::fmt;

use devtunnel_core::error::{ErrorCode, TunnelError};

pub const SUCCESS: i32 = 0;
/// Backend initialization failed before the runtime became active.
pub const FAILURE: i32 = 1;
/// The broker could not be reached on startup.
pub const TRANSPORT_ERROR: i32 = 3;
/// Bad flags, invalid config, or no broker URL.
pub const USAGE: i32 = 64;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Map a startup failure to its exit code.
pub fn startup_error(context: &str, err: TunnelError) -> CliError {
    let code = match err.code() {
        ErrorCode::Config => USAGE,
        ErrorCode::Handshake | ErrorCode::Timeout | ErrorCode::ConnectionClosed => {
            TRANSPORT_ERROR
        }
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}
