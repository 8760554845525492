//! Command-line surface. Flags override the YAML config file.

use std::path::PathBuf;

use clap::Parser;

use devtunnel_core::error::Result;

use crate::config::{self, FunctionConcurrency, InvokerKind, RuntimeConcurrency, TunnelConfig};
use crate::logging::LogFormat;

#[derive(Parser, Debug, Default)]
#[command(name = "devtunnel", version, about = "Run remote function invocations locally")]
pub struct Cli {
    /// YAML config file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Broker endpoint (`wss://` is assumed without a scheme).
    #[arg(long, value_name = "URL", env = "DEVTUNNEL_BROKER_URL")]
    pub broker_url: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub connection_name: Option<String>,

    /// Credential sent on the handshake.
    #[arg(long, value_name = "KEY", env = "DEVTUNNEL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, value_name = "KIND")]
    pub invoker: Option<InvokerKind>,

    /// Shell command run for each invocation.
    #[arg(long, value_name = "CMD")]
    pub command: Option<String>,

    #[arg(long, value_name = "CMD")]
    pub init_command: Option<String>,

    #[arg(long, value_name = "CMD")]
    pub reload_command: Option<String>,

    #[arg(long, value_name = "MODE")]
    pub runtime_concurrency: Option<RuntimeConcurrency>,

    #[arg(long, value_name = "MODE")]
    pub function_concurrency: Option<FunctionConcurrency>,

    /// Reload the runtime when files change under PATH (the working
    /// directory when no path is given). Repeatable.
    #[arg(long, value_name = "PATH", num_args = 0..)]
    pub watch: Option<Vec<PathBuf>>,

    /// Debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Trace logging, including raw frames.
    #[arg(long)]
    pub verbose: bool,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Load the config file (or defaults), apply flag overrides, validate.
    pub fn resolve_config(&self) -> Result<TunnelConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_from_file(path)?,
            None => TunnelConfig::default(),
        };
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply(&self, cfg: &mut TunnelConfig) {
        if let Some(url) = &self.broker_url {
            cfg.broker.url = Some(url.clone());
        }
        if let Some(name) = &self.connection_name {
            cfg.broker.connection_name = name.clone();
        }
        if let Some(key) = &self.api_key {
            cfg.broker.api_key = Some(key.clone());
        }
        if let Some(kind) = self.invoker {
            cfg.invoker.kind = kind;
        }
        if let Some(cmd) = &self.command {
            cfg.invoker.command = Some(cmd.clone());
        }
        if let Some(cmd) = &self.init_command {
            cfg.invoker.init_command = Some(cmd.clone());
        }
        if let Some(cmd) = &self.reload_command {
            cfg.invoker.reload_command = Some(cmd.clone());
        }
        if let Some(mode) = self.runtime_concurrency {
            cfg.runtime.concurrency = mode;
        }
        if let Some(mode) = self.function_concurrency {
            cfg.runtime.function_concurrency = mode;
        }
        if let Some(paths) = &self.watch {
            cfg.reload.enabled = true;
            if !paths.is_empty() {
                cfg.reload.paths = paths.clone();
            }
        }
    }
}
