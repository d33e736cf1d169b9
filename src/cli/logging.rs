//! Logging setup
//!
//! Log output goes to stderr so the inclusion document on stdout stays
//! machine-readable. `RUST_LOG` overrides the `--loglevel` flag.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub fn init_logging(loglevel: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(loglevel)
            .with_context(|| format!("Invalid log level: {loglevel}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}
