//! Store handle: the single owner of the SQLite connection.
//!
//! Every record, transfer and cache component receives an `Arc<Store>`; there is
//! no process-wide connection. All access is serialized through one mutex, and
//! each operation is logged with its name, a ULID and its outcome.

use crate::core::config::StoreConfig;
use crate::core::db;
use crate::core::error::{LabbookError, Result};
use crate::core::time::{Clock, SystemClock};
use crate::subsystems;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use ulid::Ulid;

pub struct Store {
    conn: Mutex<Connection>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the store and run schema initialization. Any failure is an
    /// `InitializationError`; no handle is returned for a partial schema.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    pub fn open_with_clock(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = db::connect_ready(config)?;
        let store = Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            clock,
        };
        subsystems::initialize_all(&store).map_err(|e| match e {
            LabbookError::InitializationError(_) => e,
            other => LabbookError::InitializationError(other.to_string()),
        })?;
        info!(path = %config.path, "store initialized");
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-operation has already rolled back its transaction.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the connection with no transaction (autocommit per statement).
    pub fn with_conn<F, R>(&self, op_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.lock();
        let result = f(&conn);
        log_outcome(op_name, &result);
        result
    }

    /// Run `f` inside an IMMEDIATE transaction. Commits only if `f` succeeds;
    /// an error or a panic rolls every statement back.
    pub fn with_write<F, R>(&self, op_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        self.with_tx(op_name, TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a DEFERRED transaction so multi-query reads see one snapshot.
    pub fn with_read<F, R>(&self, op_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        self.with_tx(op_name, TransactionBehavior::Deferred, f)
    }

    fn with_tx<F, R>(&self, op_name: &str, behavior: TransactionBehavior, f: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        let mut conn = self.lock();
        let result = (|| -> Result<R> {
            let mut tx = conn.transaction_with_behavior(behavior)?;
            let value = f(&mut tx)?;
            tx.commit()?;
            Ok(value)
        })();
        log_outcome(op_name, &result);
        result
    }
}

fn log_outcome<R>(op_name: &str, result: &Result<R>) {
    let op_id = Ulid::new();
    match result {
        Ok(_) => debug!(%op_id, op = op_name, status = "success", "store op"),
        Err(e) => debug!(%op_id, op = op_name, status = "error", error = %e, "store op"),
    }
}
