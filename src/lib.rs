//! Labbook: a local-first experiment tracker.
//!
//! Experiments (name, why, how, expectation, status) and their append-only
//! progress notes live in an embedded SQLite store. There is no server: all
//! persistence, querying and business logic run in-process.
//!
//! # Architecture
//!
//! - **Store** ([`core::store::Store`]): the one owner of the SQLite connection.
//!   Every component receives it explicitly as `Arc<Store>`.
//! - **Schema** ([`subsystems`]): idempotent table creation on open. A store
//!   that cannot be opened or initialized is a fatal `InitializationError`.
//! - **Records** ([`plugins::experiments`]): parameterized CRUD. Delete and
//!   add-note run as single transactions.
//! - **Transfer** ([`plugins::transfer`]): whole-dataset JSON export and an
//!   all-or-nothing validated import with a configurable name-conflict policy.
//! - **Cache** ([`plugins::cache`]): the view layer's read model. Mutations
//!   invalidate the whole collection; the next read refetches it.
//!
//! # Example
//!
//! ```no_run
//! use labbook::plugins::experiments::NewExperiment;
//!
//! let session = labbook::bootstrap(std::path::Path::new("."))?;
//! session.cache.create_experiment(&NewExperiment::new(
//!     "Cold showers",
//!     "Energy",
//!     "Daily for a month",
//!     "Better focus",
//! ))?;
//! let view = session.cache.load();
//! # Ok::<(), labbook::core::error::LabbookError>(())
//! ```

pub mod core;
pub mod plugins;
pub mod subsystems;

use crate::core::config::{self, LabbookConfig};
use crate::core::error::Result;
use crate::core::logging;
use crate::core::store::Store;
use crate::plugins::cache::ExperimentCache;
use std::path::Path;
use std::sync::Arc;

/// Everything a host needs after startup.
pub struct Session {
    pub config: LabbookConfig,
    pub cache: ExperimentCache,
}

impl Session {
    pub fn store(&self) -> &Arc<Store> {
        self.cache.store()
    }
}

/// Load `labbook.toml` from `config_dir`, install logging, open and
/// initialize the store, and build the experiment cache.
pub fn bootstrap(config_dir: &Path) -> Result<Session> {
    let config = config::load_config(config_dir)?;
    open_session(config)
}

pub fn open_session(config: LabbookConfig) -> Result<Session> {
    logging::init(&config.logging);
    let store = Arc::new(Store::open(&config.store)?);
    let cache = ExperimentCache::with_import_policy(store, config.import.conflict_policy);
    Ok(Session { config, cache })
}
