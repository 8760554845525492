use std::path::PathBuf;

use clap::ValueEnum;
use serde::Deserialize;

use devtunnel_core::error::{Result, TunnelError};
use devtunnel_core::protocol::types::{DEFAULT_CONNECTION_NAME, MAX_FRAME_BYTES};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    pub version: u32,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub runtime: RuntimeSection,

    #[serde(default)]
    pub invoker: InvokerSection,

    #[serde(default)]
    pub reload: ReloadSection,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            version: 1,
            broker: BrokerSection::default(),
            runtime: RuntimeSection::default(),
            invoker: InvokerSection::default(),
            reload: ReloadSection::default(),
        }
    }
}

impl TunnelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(TunnelError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.broker.validate()?;
        self.reload.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    /// Broker endpoint; `wss://` is assumed when no scheme is given.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_connection_name")]
    pub connection_name: String,

    /// Credential attached to the handshake.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Fixed pause before each reconnect attempt. 0 reconnects immediately.
    #[serde(default)]
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: None,
            connection_name: default_connection_name(),
            api_key: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            reconnect_delay_ms: 0,
        }
    }
}

impl BrokerSection {
    pub fn validate(&self) -> Result<()> {
        if self.connection_name.trim().is_empty() {
            return Err(TunnelError::Config(
                "broker.connection_name must not be empty".into(),
            ));
        }
        if !(100..=120000).contains(&self.connect_timeout_ms) {
            return Err(TunnelError::Config(
                "broker.connect_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if !(1000..=600000).contains(&self.ping_interval_ms) {
            return Err(TunnelError::Config(
                "broker.ping_interval_ms must be between 1000 and 600000".into(),
            ));
        }
        if self.ping_timeout_ms == 0 || self.ping_timeout_ms >= self.ping_interval_ms {
            return Err(TunnelError::Config(
                "broker.ping_timeout_ms must be positive and less than ping_interval_ms".into(),
            ));
        }
        if !(1..=1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(TunnelError::Config(
                "broker.max_frame_bytes must be between 1 and 1048576".into(),
            ));
        }
        if self.reconnect_delay_ms > 600000 {
            return Err(TunnelError::Config(
                "broker.reconnect_delay_ms must not exceed 600000".into(),
            ));
        }
        Ok(())
    }

    /// The broker URL, or a config error when none was given.
    pub fn require_url(&self) -> Result<&str> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(TunnelError::Config("no broker URL is configured".into())),
        }
    }
}

fn default_connection_name() -> String {
    DEFAULT_CONNECTION_NAME.into()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_ping_interval_ms() -> u64 {
    30000
}
fn default_ping_timeout_ms() -> u64 {
    3000
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

/// Runtime-level admission mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeConcurrency {
    /// Reject while any invocation is running.
    #[default]
    Reject,
    /// Queue behind the running invocation.
    Wait,
    /// Defer to the function-level mode, one slot per function.
    PerFunction,
}

/// Function-level admission mode (consulted only for `per-function`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionConcurrency {
    #[default]
    Reject,
    Wait,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    #[serde(default)]
    pub concurrency: RuntimeConcurrency,

    #[serde(default)]
    pub function_concurrency: FunctionConcurrency,
}

/// Execution backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InvokerKind {
    /// Pick the available backend (currently always `command`).
    #[default]
    Auto,
    Command,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvokerSection {
    #[serde(default)]
    pub kind: InvokerKind,

    /// Shell command run once per invocation.
    #[serde(default)]
    pub command: Option<String>,

    /// Shell command run on init (e.g. a build step).
    #[serde(default)]
    pub init_command: Option<String>,

    /// Shell command run on reload.
    #[serde(default)]
    pub reload_command: Option<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// File-watch hot reload.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReloadSection {
    #[serde(default)]
    pub enabled: bool,

    /// Watched recursively; the working directory when empty.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Quiet period that folds a burst of changes into one reload.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ReloadSection {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: Vec::new(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl ReloadSection {
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms > 60000 {
            return Err(TunnelError::Config(
                "reload.debounce_ms must not exceed 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn watch_paths(&self) -> Vec<PathBuf> {
        if self.paths.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.paths.clone()
        }
    }
}

fn default_debounce_ms() -> u64 {
    300
}
