//! devtunnel binary
//!
//! - Load config (file + flags), fail fast on a missing broker URL
//! - Initialize the runtime, then open the tunnel
//! - File changes (with `--watch`) and SIGHUP reload the runtime
//! - Ctrl-C tears everything down

use clap::Parser;

use devtunnel_client::app_state::AppState;
use devtunnel_client::cli::Cli;
use devtunnel_client::exit::{self, CliError, CliResult};
use devtunnel_client::logging::init_logging;
use devtunnel_client::watch::ReloadWatcher;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.debug, cli.verbose);

    match run(cli).await {
        Ok(()) => std::process::exit(exit::SUCCESS),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let cfg = cli
        .resolve_config()
        .map_err(|e| exit::startup_error("config", e))?;
    let state = AppState::new(cfg).map_err(|e| exit::startup_error("config", e))?;

    state
        .router()
        .init()
        .await
        .map_err(|e| CliError::new(exit::FAILURE, format!("runtime init: {e}")))?;

    let _watcher = if state.cfg().reload.enabled {
        match ReloadWatcher::start(&state.cfg().reload, state.router()) {
            Ok(w) => Some(w),
            Err(e) => {
                state.shutdown().await;
                return Err(exit::startup_error("watch", e));
            }
        }
    } else {
        None
    };

    if let Err(e) = state.client().connect(state.connect_timeout()).await {
        state.shutdown().await;
        return Err(CliError::new(
            exit::TRANSPORT_ERROR,
            format!("connect to {}: {e}", state.client().options().url),
        ));
    }

    tracing::info!(
        connection = %state.cfg().broker.connection_name,
        "tunnel is up, waiting for invocations"
    );

    wait_for_shutdown(&state).await;
    tracing::info!("shutting down");
    state.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(state: &AppState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP reload is unavailable");
            None
        }
    };

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "ctrl-c handler failed");
                }
                return;
            }
            Some(()) = next_hangup(&mut hangup) => {
                let router = state.router();
                tokio::spawn(async move {
                    match router.reload().await {
                        Ok(()) => tracing::info!("runtime reloaded"),
                        Err(e) => tracing::error!(error = %e, "runtime reload failed"),
                    }
                });
            }
        }
    }
}

#[cfg(unix)]
async fn next_hangup(sig: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_state: &AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
    }
}
