//! Invocation domain types exchanged between the broker and the local
//! execution backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ErrorInfo;

/// Taxonomy codes carried in `ErrorInfo::kind` for failures raised locally.
pub mod error_types {
    /// Runtime-level admission rejected: another invocation holds the runtime.
    pub const RUNTIME_IN_USE: &str = "RUNTIME_IN_USE";
    /// Function-level admission rejected: the function is already running.
    pub const FUNCTION_IN_USE: &str = "FUNCTION_IN_USE";
    /// Runtime lifecycle is inactive (never initialized, or destroyed).
    pub const RUNTIME_NOT_ACTIVE: &str = "RUNTIME_NOT_ACTIVE";
    /// The invocation request payload could not be parsed.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// The execution backend panicked while handling the invocation.
    pub const PANIC: &str = "PANIC";
}

/// A routed function invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Epoch millis when the remote side initialized; backends use it to
    /// detect stale credentials.
    #[serde(default)]
    pub init_time: i64,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub function_arn: String,
    pub function_name: String,
    #[serde(default)]
    pub function_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub timeout: u64,
    /// Megabytes.
    #[serde(default)]
    pub memory_size: u64,
    #[serde(default)]
    pub log_group_name: String,
    #[serde(default)]
    pub log_stream_name: String,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_context: Option<Value>,
    /// Raw event body.
    #[serde(default)]
    pub request: Value,
}

/// Result of one invocation. `error` set means the invocation failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl InvocationResponse {
    pub fn ok(response: Value) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            response: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Taxonomy code of the error, if any.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}
