//! Admission control: at most one running invocation per key.
//!
//! Keys are either the runtime-wide [`GLOBAL_LOCK_KEY`] or a function name,
//! depending on the configured policy. This is independent of the router's
//! runtime read/write lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use devtunnel_core::invocation::error_types;
use devtunnel_core::protocol::ErrorInfo;

use crate::config::{FunctionConcurrency, RuntimeConcurrency, RuntimeSection};

/// Admission key shared by every invocation under runtime-level modes.
pub const GLOBAL_LOCK_KEY: &str = "$global";

/// Lazily created mutex per key. Entries are never evicted.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Acquire without waiting; `None` when the key is busy.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(key).try_lock_owned().ok()
    }

    /// Queue until the key is free.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }
}

/// Outcome of an admission attempt. The guard releases the key on drop.
pub enum Admission {
    Admitted(OwnedMutexGuard<()>),
    Rejected(ErrorInfo),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub runtime: RuntimeConcurrency,
    pub function: FunctionConcurrency,
}

impl AdmissionPolicy {
    pub fn from_config(cfg: &RuntimeSection) -> Self {
        Self {
            runtime: cfg.concurrency,
            function: cfg.function_concurrency,
        }
    }

    pub async fn admit(&self, locks: &KeyedLocks, function_name: &str) -> Admission {
        match self.runtime {
            RuntimeConcurrency::Reject => match locks.try_acquire(GLOBAL_LOCK_KEY) {
                Some(guard) => Admission::Admitted(guard),
                None => Admission::Rejected(ErrorInfo::internal(
                    error_types::RUNTIME_IN_USE,
                    "runtime is in use by another invocation",
                )),
            },
            RuntimeConcurrency::Wait => Admission::Admitted(locks.acquire(GLOBAL_LOCK_KEY).await),
            RuntimeConcurrency::PerFunction => match self.function {
                FunctionConcurrency::Reject => match locks.try_acquire(function_name) {
                    Some(guard) => Admission::Admitted(guard),
                    None => Admission::Rejected(ErrorInfo::internal(
                        error_types::FUNCTION_IN_USE,
                        format!("function {function_name} is in use by another invocation"),
                    )),
                },
                FunctionConcurrency::Wait => {
                    Admission::Admitted(locks.acquire(function_name).await)
                }
            },
        }
    }
}
