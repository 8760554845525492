//! Tunnel config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use devtunnel_core::error::{Result, TunnelError};

pub use schema::{
    BrokerSection, FunctionConcurrency, InvokerKind, InvokerSection, ReloadSection,
    RuntimeConcurrency, RuntimeSection, TunnelConfig,
};

pub fn load_from_file(path: &Path) -> Result<TunnelConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| TunnelError::Config(format!("read {} failed: {e}", path.display())))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<TunnelConfig> {
    let cfg: TunnelConfig =
        serde_yaml::from_str(s).map_err(|e| TunnelError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
