//! Invocation router: lifecycle gate, runtime drain lock, and admission in
//! front of the execution backend.
//!
//! - `invoke` holds the runtime read lock, so invocations run concurrently
//! - `init` / `reload` hold the write lock, so they wait for running
//!   invocations and hold back new ones
//! - `destroy` flips the lifecycle flag without touching the lock

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::RwLock;

use devtunnel_core::error::{Result, TunnelError};
use devtunnel_core::invocation::{error_types, InvocationRequest, InvocationResponse};
use devtunnel_core::protocol::ErrorInfo;

use crate::invoke::Invoker;
use crate::runtime::admission::{Admission, AdmissionPolicy, KeyedLocks};

pub struct InvocationRouter {
    invoker: Arc<dyn Invoker>,
    policy: AdmissionPolicy,
    locks: KeyedLocks,
    runtime: RwLock<()>,
    active: AtomicBool,
}

fn not_active() -> InvocationResponse {
    InvocationResponse::failed(ErrorInfo::internal(
        error_types::RUNTIME_NOT_ACTIVE,
        "runtime is not active",
    ))
}

impl InvocationRouter {
    pub fn new(invoker: Arc<dyn Invoker>, policy: AdmissionPolicy) -> Self {
        Self {
            invoker,
            policy,
            locks: KeyedLocks::new(),
            runtime: RwLock::new(()),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn init(&self) -> Result<()> {
        let _runtime = self.runtime.write().await;
        if self.is_active() {
            return Err(TunnelError::RuntimeAlreadyActive);
        }
        tracing::info!(invoker = self.invoker.name(), "initializing runtime");
        self.invoker.init().await?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Run one invocation. Admission, lifecycle and backend failures all
    /// come back as a failed response.
    pub async fn invoke(&self, req: InvocationRequest) -> InvocationResponse {
        let _runtime = self.runtime.read().await;
        if !self.is_active() {
            return not_active();
        }

        let _slot = match self.policy.admit(&self.locks, &req.function_name).await {
            Admission::Admitted(guard) => guard,
            Admission::Rejected(err) => {
                tracing::debug!(function = %req.function_name, kind = %err.kind, "invocation rejected");
                return InvocationResponse::failed(err);
            }
        };
        // destroyed while queued for admission
        if !self.is_active() {
            return not_active();
        }

        tracing::debug!(function = %req.function_name, request_id = %req.request_id, "invoking");
        match AssertUnwindSafe(self.invoker.invoke(&req)).catch_unwind().await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::warn!(function = %req.function_name, error = %e, "backend failed");
                InvocationResponse::failed(e.into())
            }
            Err(_) => {
                tracing::error!(function = %req.function_name, "backend panicked");
                InvocationResponse::failed(ErrorInfo::internal(
                    error_types::PANIC,
                    "execution backend panicked",
                ))
            }
        }
    }

    pub async fn reload(&self) -> Result<()> {
        let _runtime = self.runtime.write().await;
        if !self.is_active() {
            return Err(TunnelError::RuntimeNotActive);
        }
        tracing::info!(invoker = self.invoker.name(), "reloading runtime");
        self.invoker.reload().await?;
        Ok(())
    }

    /// Deactivate and tear down the backend without draining.
    /// No-op when the runtime is not active.
    pub async fn destroy(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(invoker = self.invoker.name(), "destroying runtime");
        self.invoker.destroy().await?;
        Ok(())
    }
}
