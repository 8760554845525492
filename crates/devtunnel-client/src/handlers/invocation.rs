use std::sync::Arc;

use async_trait::async_trait;

use devtunnel_core::error::Result;
use devtunnel_core::invocation::{error_types, InvocationRequest};
use devtunnel_core::protocol::{ErrorInfo, Message, MessageType};

use crate::dispatch::{MessageHandler, Reply};
use crate::runtime::InvocationRouter;

/// Runs routed invocations through the router and answers with the result.
pub struct InvocationHandler {
    router: Arc<InvocationRouter>,
}

impl InvocationHandler {
    pub fn new(router: Arc<InvocationRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for InvocationHandler {
    fn message_type(&self) -> MessageType {
        MessageType::ClientRequest
    }

    async fn handle(&self, msg: &Message) -> Result<Option<Reply>> {
        let parsed = match msg.data.clone() {
            Some(data) => serde_json::from_value::<InvocationRequest>(data).map_err(|e| e.to_string()),
            None => Err("missing invocation request".to_string()),
        };
        let req = match parsed {
            Ok(req) => req,
            Err(reason) => {
                tracing::warn!(id = %msg.id, %reason, "invalid invocation request");
                let error = ErrorInfo::internal(error_types::INVALID_REQUEST, reason);
                return Ok(Some(Reply::new(MessageType::ClientError).with_error(Some(error))));
            }
        };

        let function = req.function_name.clone();
        let resp = self.router.invoke(req).await;
        if let Some(kind) = resp.error_kind() {
            tracing::debug!(id = %msg.id, %function, kind, "invocation failed");
        }
        Ok(Some(
            Reply::new(MessageType::ClientResponse)
                .with_data(resp.response)
                .with_error(resp.error),
        ))
    }
}
