//! Broker envelope (JSON text frame) and the decoded message.
//!
//! The envelope's `payload` is itself a JSON document serialized to a string,
//! so it can be cut into fragments at arbitrary offsets and glued back before
//! parsing.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::MessageType;

/// Sentinel for `fragmentNo` / `fragmentCount` on non-fragmented envelopes.
pub const NO_FRAGMENT: i64 = -1;

/// One wire frame, possibly one fragment of a larger message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Correlation id, shared by all fragments of one message.
    pub id: String,
    #[serde(default)]
    pub connection_name: String,
    /// Message type tag (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_connection_type: Option<String>,
    /// Serialized `Payload` (or a slice of it when fragmented).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub fragmented: bool,
    #[serde(default = "no_fragment", deserialize_with = "null_as_no_fragment")]
    pub fragment_no: i64,
    #[serde(default = "no_fragment", deserialize_with = "null_as_no_fragment")]
    pub fragment_count: i64,
}

fn no_fragment() -> i64 {
    NO_FRAGMENT
}

fn null_as_false<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(false))
}

fn null_as_no_fragment<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    Ok(Option::<i64>::deserialize(d)?.unwrap_or(NO_FRAGMENT))
}

/// Structured error carried in a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Error type / taxonomy code (field name is `type` in JSON).
    #[serde(rename = "type", default, deserialize_with = "loose_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub message: String,
    /// One entry per frame. Senders may also use a single newline-joined
    /// string; it is split into lines on decode.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "loose_stack_trace"
    )]
    pub stack_trace: Option<Vec<String>>,
    /// Backend-specific code; string or number depending on the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "loose_bool"
    )]
    pub internal: Option<bool>,
}

// Error payloads come from backends in several languages; field types drift,
// so these never fail on a well-formed JSON value.

fn value_text(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn loose_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(value_text(Value::deserialize(d)?).unwrap_or_default())
}

fn loose_stack_trace<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<String>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s.lines().map(str::to_string).collect()),
        Value::Array(items) => Some(items.into_iter().filter_map(value_text).collect()),
        other => Some(vec![other.to_string()]),
    })
}

fn loose_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    })
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Error raised by this process rather than by the user's function.
    pub fn internal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            internal: Some(true),
            ..Self::new(kind, message)
        }
    }
}

/// Decoded content of `Envelope::payload`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Logical message: envelope routing fields plus the decoded payload.
///
/// An empty `id` means "not assigned yet"; the client fills one in on send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    pub connection_name: String,
    pub msg_type: String,
    pub response_of: Option<String>,
    pub source_connection_id: Option<String>,
    pub source_connection_type: Option<String>,
    pub target_connection_id: Option<String>,
    pub target_connection_type: Option<String>,
    pub data: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl Message {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type: msg_type.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// Typed view of `msg_type`; `None` for tags this client does not know.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::parse(&self.msg_type)
    }

    pub fn payload(&self) -> Payload {
        Payload {
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }

    /// Envelope carrying this message's routing fields and `payload` as-is.
    pub(crate) fn envelope(&self, payload: String) -> Envelope {
        Envelope {
            id: self.id.clone(),
            connection_name: self.connection_name.clone(),
            msg_type: self.msg_type.clone(),
            response_of: self.response_of.clone(),
            source_connection_id: self.source_connection_id.clone(),
            source_connection_type: self.source_connection_type.clone(),
            target_connection_id: self.target_connection_id.clone(),
            target_connection_type: self.target_connection_type.clone(),
            payload: Some(payload),
            fragmented: false,
            fragment_no: NO_FRAGMENT,
            fragment_count: NO_FRAGMENT,
        }
    }

    pub(crate) fn from_parts(env: Envelope, payload: Payload) -> Self {
        Self {
            id: env.id,
            connection_name: env.connection_name,
            msg_type: env.msg_type,
            response_of: env.response_of,
            source_connection_id: env.source_connection_id,
            source_connection_type: env.source_connection_type,
            target_connection_id: env.target_connection_id,
            target_connection_type: env.target_connection_type,
            data: payload.data,
            error: payload.error,
        }
    }
}
