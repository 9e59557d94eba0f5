use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber: timestamped, level-tagged lines on stderr.
///
/// `level` takes precedence over `RUST_LOG`. Call once, at startup.
pub fn init(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level or filter: {level}"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;

    Ok(())
}
