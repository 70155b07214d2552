//! Log subscriber setup

use anyhow::Result;
use std::io;

/// `RUST_LOG` wins; otherwise `-v` raises and `--quiet` lowers the level
pub fn setup_logging(verbose: u8, quiet: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if quiet => EnvFilter::new("error"),
        Err(_) => EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }),
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_level(true);

    tracing_subscriber::registry().with(formatter).with(filter).try_init()?;
    Ok(())
}
