//! Logging initialization, shared by both the `send` and `receive`
//! subcommands.

use tracing_subscriber::EnvFilter;

/// Initialize a `tracing` subscriber writing to stderr. `level` is
/// used as the default filter when `RUST_LOG` is unset.
pub fn init(level: &str, verbose: bool) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
