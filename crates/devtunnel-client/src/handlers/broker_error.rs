use async_trait::async_trait;

use devtunnel_core::error::Result;
use devtunnel_core::protocol::types::BROKER_ERROR_FORWARD_FAILED;
use devtunnel_core::protocol::{Message, MessageType};

use crate::dispatch::{MessageHandler, Reply};

/// Broker-originated error notices: logged, never answered.
pub struct BrokerErrorHandler;

#[async_trait]
impl MessageHandler for BrokerErrorHandler {
    fn message_type(&self) -> MessageType {
        MessageType::BrokerError
    }

    async fn handle(&self, msg: &Message) -> Result<Option<Reply>> {
        let Some(err) = &msg.error else {
            tracing::error!(id = %msg.id, "broker error without details");
            return Ok(None);
        };
        if err.kind == BROKER_ERROR_FORWARD_FAILED {
            // target already gone, the invocation finished on its own
            tracing::debug!(id = %msg.id, message = %err.message, "broker could not forward response");
        } else {
            tracing::error!(id = %msg.id, kind = %err.kind, message = %err.message, "broker error");
        }
        Ok(None)
    }
}
