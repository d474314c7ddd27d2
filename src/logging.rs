//! Logging init: structured events to stderr so stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,payguard=debug";

/// Initialize the global subscriber. `RUST_LOG` wins over `fallback`, which
/// wins over the built-in default.
pub fn init_logging(fallback: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback.unwrap_or(DEFAULT_FILTER)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
