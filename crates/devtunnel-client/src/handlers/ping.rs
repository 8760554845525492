use async_trait::async_trait;

use devtunnel_core::error::Result;
use devtunnel_core::protocol::{Message, MessageType};

use crate::dispatch::{MessageHandler, Reply};

/// Broker-initiated liveness check; answered with an empty pong.
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    fn message_type(&self) -> MessageType {
        MessageType::ClientPing
    }

    async fn handle(&self, _msg: &Message) -> Result<Option<Reply>> {
        Ok(Some(Reply::new(MessageType::ClientPong)))
    }
}
