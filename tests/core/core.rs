use labbook::core::config::{self, ConflictPolicy, LabbookConfig, StoreConfig};
use labbook::core::error::LabbookError;
use labbook::core::schemas;
use labbook::core::store::Store;
use labbook::plugins::experiments::{self, NewExperiment};
use labbook::subsystems;
use rusqlite::params;
use std::fs;
use tempfile::tempdir;

fn table_names(store: &Store) -> Vec<String> {
    store
        .with_conn("test.tables", |conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .expect("list tables")
}

#[test]
fn open_creates_schema_with_foreign_keys_enforced() {
    let store = Store::open_in_memory().expect("open store");
    assert_eq!(
        table_names(&store),
        vec!["experiments", "meta", "progress_updates"]
    );

    let fk_on: i64 = store
        .with_conn("test.fk", |conn| {
            Ok(conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?)
        })
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);

    let version: String = store
        .with_conn("test.version", |conn| {
            Ok(conn.query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )?)
        })
        .expect("schema version");
    assert_eq!(version, schemas::SCHEMA_VERSION);
}

#[test]
fn schema_initialization_is_idempotent_and_keeps_data() {
    let tmp = tempdir().expect("tempdir");
    let config = StoreConfig::at(tmp.path().join("labbook.db"));

    {
        let store = Store::open(&config).expect("first open");
        experiments::create_experiment(&store, &NewExperiment::new("persisted", "w", "h", "e"))
            .expect("create");
        subsystems::ensure_schema(&store).expect("re-run init on live handle");
    }

    let reopened = Store::open(&config).expect("second open");
    assert_eq!(reopened.config(), &config);
    assert!(!reopened.config().is_memory());
    let rows = experiments::list_experiments(&reopened).expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "persisted");
}

#[test]
fn unopenable_store_is_fatal_initialization_error() {
    let tmp = tempdir().expect("tempdir");
    let config = StoreConfig::at(tmp.path().join("no-such-dir").join("labbook.db"));
    let err = Store::open(&config).expect_err("open must fail");
    assert!(matches!(err, LabbookError::InitializationError(_)), "{err}");
    assert!(!err.is_recoverable());
}

#[test]
fn newer_schema_version_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    let config = StoreConfig::at(tmp.path().join("labbook.db"));
    {
        let store = Store::open(&config).expect("open");
        store
            .with_conn("test.bump_version", |conn| {
                conn.execute(
                    "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
                    params!["99"],
                )?;
                Ok(())
            })
            .expect("bump version");
    }
    let err = Store::open(&config).expect_err("version mismatch");
    assert!(matches!(err, LabbookError::InitializationError(_)));
    assert!(err.to_string().contains("99"), "{err}");
}

#[test]
fn write_transaction_rolls_back_on_error() {
    let store = Store::open_in_memory().expect("open store");
    let result: Result<(), LabbookError> = store.with_write("test.rollback", |tx| {
        tx.execute(
            "INSERT INTO experiments(name, why, how, expectation, status) VALUES('a', 'w', 'h', 'e', 'Planned')",
            [],
        )?;
        Err(LabbookError::ValidationError("intentional".to_string()))
    });
    assert!(result.is_err());
    assert!(experiments::list_experiments(&store).expect("list").is_empty());
}

#[test]
fn store_defaults_stamp_rows_in_canonical_format() {
    let store = Store::open_in_memory().expect("open store");
    let (created, updated): (String, String) = store
        .with_conn("test.defaults", |conn| {
            conn.execute(
                "INSERT INTO experiments(name, why, how, expectation, status) VALUES('d', 'w', 'h', 'e', 'Planned')",
                [],
            )?;
            Ok(conn.query_row(
                "SELECT created_at, updated_at FROM experiments WHERE name = 'd'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .expect("insert with defaults");
    assert_eq!(created.len(), "2024-01-01T00:00:00.000Z".len());
    assert!(created.ends_with('Z'));
    assert!(updated >= created);
}

#[test]
fn status_check_constraint_guards_raw_writes() {
    let store = Store::open_in_memory().expect("open store");
    let result = store.with_conn("test.bad_status", |conn| {
        conn.execute(
            "INSERT INTO experiments(name, why, how, expectation, status) VALUES('x', 'w', 'h', 'e', 'Paused')",
            [],
        )?;
        Ok(())
    });
    assert!(matches!(result, Err(LabbookError::StoreError(_))));
}

#[test]
fn config_file_and_defaults() {
    let tmp = tempdir().expect("tempdir");
    let defaults = config::load_config(tmp.path()).expect("defaults without file");
    assert_eq!(defaults.import.conflict_policy, ConflictPolicy::Skip);

    fs::write(
        tmp.path().join(config::CONFIG_FILE_NAME),
        "[store]\npath = \":memory:\"\nbusy_timeout_ms = 250\n\n[import]\nconflict_policy = \"overwrite\"\n",
    )
    .expect("write config");
    let parsed = config::parse_config(
        &fs::read_to_string(tmp.path().join(config::CONFIG_FILE_NAME)).expect("read config"),
    )
    .expect("parse config");
    assert!(parsed.store.is_memory());
    assert_eq!(parsed.store.busy_timeout_ms, 250);
    assert_eq!(parsed.import.conflict_policy, ConflictPolicy::Overwrite);
}

#[test]
fn malformed_config_file_is_config_error() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join(config::CONFIG_FILE_NAME), "[store\npath = 1").expect("write");
    let err = config::load_config(tmp.path()).expect_err("bad toml");
    assert!(matches!(err, LabbookError::ConfigError(_)));
}

#[test]
fn open_session_wires_store_and_cache() {
    let mut config = LabbookConfig::default();
    config.store = StoreConfig::in_memory();
    config.import.conflict_policy = ConflictPolicy::FailFast;

    let session = labbook::open_session(config).expect("session");
    session
        .cache
        .create_experiment(&NewExperiment::new("wired", "w", "h", "e"))
        .expect("create through cache");
    let rows = experiments::list_experiments(session.store()).expect("list");
    assert_eq!(rows.len(), 1);
}
