use async_trait::async_trait;

use devtunnel_core::error::Result;
use devtunnel_core::protocol::{Message, MessageType};

use crate::dispatch::{MessageHandler, Reply};

/// Another client registered under our connection name and took over.
pub struct ConnectionOverrideHandler;

#[async_trait]
impl MessageHandler for ConnectionOverrideHandler {
    fn message_type(&self) -> MessageType {
        MessageType::ClientConnectionOverride
    }

    async fn handle(&self, msg: &Message) -> Result<Option<Reply>> {
        tracing::warn!(
            connection = %msg.connection_name,
            "connection has been overridden by another client with the same name; \
             invocations will no longer be routed here"
        );
        Ok(None)
    }
}
