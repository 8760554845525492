//! Process composition: one router, one dispatcher, one tunnel client,
//! built explicitly and owned by whoever runs the process.

use std::sync::Arc;
use std::time::Duration;

use devtunnel_core::error::Result;

use crate::config::TunnelConfig;
use crate::dispatch::Dispatcher;
use crate::handlers;
use crate::invoke::{self, Invoker};
use crate::runtime::{AdmissionPolicy, InvocationRouter};
use crate::transport::{ClientOptions, MessageListener, TunnelClient};

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<TunnelConfig>,
    router: Arc<InvocationRouter>,
    dispatcher: Arc<Dispatcher>,
    client: TunnelClient,
}

impl AppState {
    /// Build state with the backend selected by the config.
    pub fn new(cfg: TunnelConfig) -> Result<Self> {
        let invoker = invoke::create(&cfg.invoker)?;
        Self::with_invoker(cfg, invoker)
    }

    pub fn with_invoker(cfg: TunnelConfig, invoker: Arc<dyn Invoker>) -> Result<Self> {
        let opts = ClientOptions::from_config(&cfg.broker)?;

        let router = Arc::new(InvocationRouter::new(
            invoker,
            AdmissionPolicy::from_config(&cfg.runtime),
        ));

        let dispatcher = Arc::new(Dispatcher::new(cfg.broker.connection_name.clone()));
        handlers::register_defaults(&dispatcher, Arc::clone(&router));
        tracing::debug!(handlers = ?dispatcher.registered_types(), "registered message handlers");

        let listener: Arc<dyn MessageListener> = dispatcher.clone();
        let client = TunnelClient::new(opts, Some(listener));

        Ok(Self {
            cfg: Arc::new(cfg),
            router,
            dispatcher,
            client,
        })
    }

    pub fn cfg(&self) -> &TunnelConfig {
        &self.cfg
    }

    pub fn router(&self) -> Arc<InvocationRouter> {
        Arc::clone(&self.router)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn client(&self) -> &TunnelClient {
        &self.client
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.broker.connect_timeout_ms)
    }

    /// Deactivate the runtime and close the tunnel for good.
    pub async fn shutdown(&self) {
        if let Err(e) = self.router.destroy().await {
            tracing::warn!(error = %e, "runtime teardown failed");
        }
        self.client.shutdown().await;
    }
}
