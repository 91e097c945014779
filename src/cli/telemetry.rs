use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Level used when `RUST_LOG` is not set
#[must_use]
pub const fn level(debug: bool) -> Level {
    if debug { Level::DEBUG } else { Level::WARN }
}

/// Install the global subscriber, logging to stderr
///
/// stdout carries only the JSON report.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set
pub fn init(level: Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
