//! Schema initialization registry.
//!
//! Adding a table: append one entry to `SUBSYSTEMS`.

use crate::core::error::{LabbookError, Result};
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::{Connection, OptionalExtension, params};

pub(crate) struct SubsystemInit {
    pub name: &'static str,
    pub initialize: fn(&Connection) -> Result<()>,
}

/// Order matters: `progress_updates` references `experiments`.
pub(crate) const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit { name: "meta", initialize: initialize_meta },
    SubsystemInit { name: "experiments", initialize: initialize_experiments },
    SubsystemInit { name: "progress_updates", initialize: initialize_progress_updates },
];

fn initialize_meta(conn: &Connection) -> Result<()> {
    conn.execute(schemas::META_SCHEMA, [])?;
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match current.as_deref() {
        None => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                params![schemas::SCHEMA_VERSION],
            )?;
        }
        Some(v) if v == schemas::SCHEMA_VERSION => {}
        Some(v) => {
            return Err(LabbookError::InitializationError(format!(
                "unsupported schema version '{}' (expected '{}')",
                v,
                schemas::SCHEMA_VERSION
            )));
        }
    }
    Ok(())
}

fn initialize_experiments(conn: &Connection) -> Result<()> {
    conn.execute(schemas::EXPERIMENTS_SCHEMA, [])?;
    conn.execute(schemas::EXPERIMENTS_INDEX_UPDATED, [])?;
    Ok(())
}

fn initialize_progress_updates(conn: &Connection) -> Result<()> {
    conn.execute(schemas::PROGRESS_UPDATES_SCHEMA, [])?;
    conn.execute(schemas::PROGRESS_UPDATES_INDEX_EXPERIMENT, [])?;
    Ok(())
}

/// Create every table if absent, in one transaction. Safe to call repeatedly.
pub(crate) fn initialize_all(store: &Store) -> Result<()> {
    store.with_write("schema.init", |tx| {
        for sub in SUBSYSTEMS {
            (sub.initialize)(tx).map_err(|e| {
                LabbookError::InitializationError(format!("{}: {}", sub.name, e))
            })?;
        }
        Ok(())
    })
}

/// Public re-run of the initializer for hosts that reuse a store handle.
pub fn ensure_schema(store: &Store) -> Result<()> {
    initialize_all(store)
}
