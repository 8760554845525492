use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use uuid::Uuid;

use devtunnel_core::error::Result;
use devtunnel_core::protocol::types::CLIENT_CONNECTION_TYPE;
use devtunnel_core::protocol::{ErrorInfo, Message, MessageType};

use crate::transport::{MessageListener, TunnelClient};

/// Handler for one inbound message type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn message_type(&self) -> MessageType;

    /// `None` means fire-and-forget; `Some` is wrapped into a response
    /// addressed back to the sender.
    async fn handle(&self, msg: &Message) -> Result<Option<Reply>>;
}

/// Response descriptor produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub msg_type: MessageType,
    pub data: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl Reply {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_error(mut self, error: Option<ErrorInfo>) -> Self {
        self.error = error;
        self
    }
}

/// Registry resolving inbound messages to handlers by exact type.
pub struct Dispatcher {
    connection_name: String,
    handlers: DashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(handler.message_type(), handler);
    }

    pub fn registered_types(&self) -> Vec<MessageType> {
        self.handlers.iter().map(|e| *e.key()).collect()
    }

    /// Run the handler for `msg` and build the outbound response, if any.
    ///
    /// Handler errors and panics are logged and treated as "no response".
    pub async fn dispatch(&self, msg: &Message) -> Option<Message> {
        let handler = match msg.kind().and_then(|t| self.handlers.get(&t)) {
            Some(h) => h.value().clone(),
            None => {
                tracing::debug!(id = %msg.id, msg_type = %msg.msg_type, "no handler for message type");
                return None;
            }
        };

        let reply = match AssertUnwindSafe(handler.handle(msg)).catch_unwind().await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(e)) => {
                tracing::error!(id = %msg.id, msg_type = %msg.msg_type, error = %e, "handler failed");
                return None;
            }
            Err(_) => {
                tracing::error!(id = %msg.id, msg_type = %msg.msg_type, "handler panicked");
                return None;
            }
        };

        Some(self.response_to(msg, reply))
    }

    fn response_to(&self, original: &Message, reply: Reply) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            connection_name: self.connection_name.clone(),
            msg_type: reply.msg_type.as_str().to_string(),
            response_of: Some(original.id.clone()),
            source_connection_id: original.target_connection_id.clone(),
            source_connection_type: Some(
                original
                    .target_connection_type
                    .clone()
                    .unwrap_or_else(|| CLIENT_CONNECTION_TYPE.to_string()),
            ),
            target_connection_id: original.source_connection_id.clone(),
            target_connection_type: original.source_connection_type.clone(),
            data: reply.data,
            error: reply.error,
        }
    }
}

#[async_trait]
impl MessageListener for Dispatcher {
    async fn on_message(&self, client: &TunnelClient, msg: Message) {
        let Some(response) = self.dispatch(&msg).await else {
            return;
        };
        if let Err(e) = client.send(response, None).await {
            tracing::warn!(response_of = %msg.id, error = %e, "failed to send response");
        }
    }
}
