//! Logging setup for embedding applications and tests.

use crate::error::{BuildError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a global `tracing` subscriber with the given filter directive.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| BuildError::InvalidArgument(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| BuildError::InvalidArgument("logging already initialized".into()))
}
