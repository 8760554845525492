use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Default directive when `RUST_LOG` is unset: `--verbose` beats `--debug`.
pub fn default_directive(debug: bool, verbose: bool) -> &'static str {
    if verbose {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber on stderr. `RUST_LOG` wins when set.
pub fn init_logging(format: LogFormat, debug: bool, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug, verbose)));

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
