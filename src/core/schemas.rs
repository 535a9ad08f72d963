//! Centralized schema definitions for the labbook store.
//!
//! One SQLite database holds three tables:
//! 1. meta: schema version bookkeeping.
//! 2. experiments: one row per tracked experiment.
//! 3. progress_updates: append-only notes, owned by an experiment (cascade delete).

pub const SCHEMA_VERSION: &str = "1";

pub const META_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const EXPERIMENTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS experiments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        why TEXT NOT NULL,
        how TEXT NOT NULL,
        expectation TEXT NOT NULL,
        status TEXT NOT NULL
            CHECK (status IN ('Planned', 'In Progress', 'Completed', 'Cancelled')),
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        CHECK (updated_at >= created_at)
    )
";

pub const PROGRESS_UPDATES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS progress_updates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id INTEGER NOT NULL,
        update_text TEXT NOT NULL,
        update_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (experiment_id) REFERENCES experiments(id) ON DELETE CASCADE
    )
";

pub const EXPERIMENTS_INDEX_UPDATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_experiments_updated_at ON experiments(updated_at)";
pub const PROGRESS_UPDATES_INDEX_EXPERIMENT: &str = "CREATE INDEX IF NOT EXISTS idx_progress_updates_experiment ON progress_updates(experiment_id, update_date)";

pub const EXPERIMENT_COLUMNS: &str =
    "id, name, why, how, expectation, status, created_at, updated_at";
pub const PROGRESS_UPDATE_COLUMNS: &str = "id, experiment_id, update_text, update_date";
