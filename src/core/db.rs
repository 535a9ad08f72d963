use crate::core::config::StoreConfig;
use crate::core::error::{LabbookError, Result};
use rusqlite::Connection;
use std::time::Duration;

/// Open a configured SQLite connection: busy timeout, foreign keys, and WAL
/// journaling for file-backed stores.
pub fn db_connect(config: &StoreConfig) -> Result<Connection> {
    let conn = if config.is_memory() {
        Connection::open_in_memory()?
    } else {
        Connection::open(config.db_path())?
    };
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(LabbookError::StoreError)?;
    if !config.is_memory() {
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
            .map_err(LabbookError::StoreError)?;
    }
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(LabbookError::StoreError)?;
    Ok(conn)
}

/// Readiness probe: touches the schema catalog so an unreadable file fails here.
pub fn probe(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|_| ())
    .map_err(LabbookError::StoreError)
}

/// Connect and probe, reporting any failure as fatal to the session.
pub fn connect_ready(config: &StoreConfig) -> Result<Connection> {
    let conn = db_connect(config).map_err(|e| {
        LabbookError::InitializationError(format!("cannot open store '{}': {}", config.path, e))
    })?;
    probe(&conn).map_err(|e| {
        LabbookError::InitializationError(format!("store '{}' is not ready: {}", config.path, e))
    })?;
    Ok(conn)
}
