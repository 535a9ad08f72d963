//! Tracing subscriber setup for hosts that embed the crate.

use crate::core::config::{ENV_LOG, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `LABBOOK_LOG`, falling back to the
/// configured filter. Returns false if a global subscriber already exists.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
