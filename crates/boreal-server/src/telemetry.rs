//! Tracing setup for the server binary.

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. A `RUST_LOG` environment variable
/// overrides the configured level.
pub fn init(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;
    Ok(())
}
