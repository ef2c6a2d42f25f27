//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::LogConfig;

/// Build the log filter: `RUST_LOG` wins, then the configured level (which
/// already carries any `MPKBOX_LOG` override). An unparsable level falls
/// back to `info`.
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a stderr `fmt` subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LogConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
