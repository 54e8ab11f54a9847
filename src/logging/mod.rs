//! Logging setup
//!
//! All diagnostics go through `tracing` and are written to stderr, leaving
//! stdout for command results. Filtering follows `RUST_LOG`; when it is not
//! set, `--verbose` and `--quiet` pick the default level.
//!
//! `RUST_LOG_FORMAT` selects the output format:
//! - `compact` - single-line output (default)
//! - `pretty` - multi-line human output
//! - `json` - one JSON object per event

use crate::error::{RegistryError, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a verbosity setting. Quiet wins over verbose.
pub fn default_filter(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "docker_registry_browser=debug,info"
    } else {
        "warn"
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose, quiet)));
    let format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format.as_str() {
        "json" => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false).json())
            .try_init(),
        "pretty" => registry
            .with(fmt::layer().with_writer(std::io::stderr).pretty())
            .try_init(),
        _ => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
    };

    installed.map_err(|e| RegistryError::Internal(format!("Failed to initialize tracing: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_overrides_verbose() {
        assert_eq!(default_filter(true, true), "error");
        assert_eq!(default_filter(false, false), "warn");
        assert!(default_filter(true, false).contains("debug"));
    }
}
