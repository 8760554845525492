//! Execution backends.
//!
//! The router is the only caller of an [`Invoker`]; backends never see
//! admission or lifecycle state.

pub mod command;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use devtunnel_core::error::{Result, TunnelError};
use devtunnel_core::invocation::{InvocationRequest, InvocationResponse};
use devtunnel_core::protocol::ErrorInfo;

use crate::config::{InvokerKind, InvokerSection};

pub use command::CommandInvoker;

/// Failure raised by a backend (as opposed to a failed invocation result).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct InvokerError {
    pub kind: String,
    pub message: String,
    pub code: Option<Value>,
    pub stack_trace: Option<Vec<String>>,
}

impl InvokerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            code: None,
            stack_trace: None,
        }
    }

    pub fn with_code(mut self, code: Value) -> Self {
        self.code = Some(code);
        self
    }
}

impl From<InvokerError> for ErrorInfo {
    fn from(e: InvokerError) -> Self {
        ErrorInfo {
            kind: e.kind,
            message: e.message,
            stack_trace: e.stack_trace,
            code: e.code,
            internal: Some(true),
        }
    }
}

impl From<InvokerError> for TunnelError {
    fn from(e: InvokerError) -> Self {
        TunnelError::Invoker(e.to_string())
    }
}

#[async_trait]
pub trait Invoker: Send + Sync {
    fn name(&self) -> &str;
    async fn init(&self) -> std::result::Result<(), InvokerError>;
    async fn invoke(
        &self,
        req: &InvocationRequest,
    ) -> std::result::Result<InvocationResponse, InvokerError>;
    async fn reload(&self) -> std::result::Result<(), InvokerError>;
    async fn destroy(&self) -> std::result::Result<(), InvokerError>;
}

/// Build the backend selected by the config.
pub fn create(cfg: &InvokerSection) -> Result<Arc<dyn Invoker>> {
    match cfg.kind {
        InvokerKind::Auto | InvokerKind::Command => {
            Ok(Arc::new(CommandInvoker::from_config(cfg)?))
        }
    }
}
