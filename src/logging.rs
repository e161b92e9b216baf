//! `tracing` subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{OrmError, Result};

/// Installs a global fmt subscriber filtered by `level` (`"info"`,
/// `"ormql=debug"`, ...).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|e| OrmError::Config(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| OrmError::Config("Logging already initialized".into()))
}
