//! Record access for experiments and their progress updates.
//!
//! Every statement binds caller values as parameters. Operations that touch
//! more than one row run in a single write transaction.

use crate::core::error::{self, LabbookError, Result};
use crate::core::schemas::{EXPERIMENT_COLUMNS, PROGRESS_UPDATE_COLUMNS};
use crate::core::store::Store;
use crate::core::time;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ExperimentStatus {
    #[default]
    Planned,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 4] = [
        ExperimentStatus::Planned,
        ExperimentStatus::InProgress,
        ExperimentStatus::Completed,
        ExperimentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Planned => "Planned",
            ExperimentStatus::InProgress => "In Progress",
            ExperimentStatus::Completed => "Completed",
            ExperimentStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = LabbookError;

    fn from_str(s: &str) -> Result<Self> {
        ExperimentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                LabbookError::ValidationError(format!(
                    "Invalid status '{}'. Must be one of: Planned, In Progress, Completed, Cancelled",
                    s
                ))
            })
    }
}

impl ToSql for ExperimentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ExperimentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: LabbookError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i64,
    pub name: String,
    pub why: String,
    pub how: String,
    pub expectation: String,
    pub status: ExperimentStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: i64,
    pub experiment_id: i64,
    pub update_text: String,
    pub update_date: String,
}

/// An experiment joined with its notes, newest note first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentWithUpdates {
    #[serde(flatten)]
    pub experiment: Experiment,
    #[serde(default)]
    pub progress_updates: Vec<ProgressUpdate>,
}

/// Fields for a new experiment. `status` defaults to `Planned`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewExperiment {
    pub name: String,
    pub why: String,
    pub how: String,
    pub expectation: String,
    pub status: ExperimentStatus,
}

impl NewExperiment {
    pub fn new(
        name: impl Into<String>,
        why: impl Into<String>,
        how: impl Into<String>,
        expectation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            why: why.into(),
            how: how.into(),
            expectation: expectation.into(),
            status: ExperimentStatus::Planned,
        }
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("why", &self.why)?;
        require("how", &self.how)?;
        require("expectation", &self.expectation)?;
        Ok(())
    }
}

/// Partial update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentPatch {
    pub name: Option<String>,
    pub why: Option<String>,
    pub how: Option<String>,
    pub expectation: Option<String>,
    pub status: Option<ExperimentStatus>,
}

impl ExperimentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn why(mut self, why: impl Into<String>) -> Self {
        self.why = Some(why.into());
        self
    }

    pub fn how(mut self, how: impl Into<String>) -> Self {
        self.how = Some(how.into());
        self
    }

    pub fn expectation(mut self, expectation: impl Into<String>) -> Self {
        self.expectation = Some(expectation.into());
        self
    }

    pub fn status(mut self, status: ExperimentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for (column, value) in [
            ("name", &self.name),
            ("why", &self.why),
            ("how", &self.how),
            ("expectation", &self.expectation),
        ] {
            if let Some(value) = value {
                require(column, value)?;
            }
        }
        Ok(())
    }

    /// Supplied columns paired with their values. Column names come from this
    /// fixed list only; values are always bound.
    fn assignments(&self) -> Vec<(&'static str, &dyn ToSql)> {
        let mut out: Vec<(&'static str, &dyn ToSql)> = Vec::new();
        if let Some(v) = &self.name {
            out.push(("name", v));
        }
        if let Some(v) = &self.why {
            out.push(("why", v));
        }
        if let Some(v) = &self.how {
            out.push(("how", v));
        }
        if let Some(v) = &self.expectation {
            out.push(("expectation", v));
        }
        if let Some(v) = &self.status {
            out.push(("status", v));
        }
        out
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LabbookError::ValidationError(format!(
            "{} is required",
            field
        )));
    }
    Ok(())
}

fn duplicate_name(name: &str) -> LabbookError {
    LabbookError::ConstraintViolation(format!(
        "an experiment named '{}' already exists",
        name
    ))
}

fn experiment_missing(id: i64) -> LabbookError {
    LabbookError::NotFound(format!("experiment {}", id))
}

fn experiment_from_row(row: &Row<'_>) -> rusqlite::Result<Experiment> {
    Ok(Experiment {
        id: row.get(0)?,
        name: row.get(1)?,
        why: row.get(2)?,
        how: row.get(3)?,
        expectation: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn progress_update_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressUpdate> {
    Ok(ProgressUpdate {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        update_text: row.get(2)?,
        update_date: row.get(3)?,
    })
}

// --- Connection-level helpers, shared with the transfer layer ---

pub(crate) fn fetch_experiment(conn: &Connection, id: i64) -> Result<Option<Experiment>> {
    let sql = format!("SELECT {} FROM experiments WHERE id = ?1", EXPERIMENT_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], experiment_from_row)
        .optional()?)
}

pub(crate) fn fetch_experiment_by_name(conn: &Connection, name: &str) -> Result<Option<Experiment>> {
    let sql = format!("SELECT {} FROM experiments WHERE name = ?1", EXPERIMENT_COLUMNS);
    Ok(conn
        .query_row(&sql, params![name], experiment_from_row)
        .optional()?)
}

pub(crate) fn fetch_progress_updates(conn: &Connection, experiment_id: i64) -> Result<Vec<ProgressUpdate>> {
    let sql = format!(
        "SELECT {} FROM progress_updates WHERE experiment_id = ?1 ORDER BY update_date DESC, id DESC",
        PROGRESS_UPDATE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![experiment_id], progress_update_from_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn fetch_all_experiments(conn: &Connection) -> Result<Vec<Experiment>> {
    let sql = format!(
        "SELECT {} FROM experiments ORDER BY updated_at DESC, id DESC",
        EXPERIMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], experiment_from_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Every experiment in list order with its notes. Callers run this inside a
/// read transaction so both queries see the same data.
pub(crate) fn fetch_all_with_updates(conn: &Connection) -> Result<Vec<ExperimentWithUpdates>> {
    let experiments = fetch_all_experiments(conn)?;

    let sql = format!(
        "SELECT {} FROM progress_updates ORDER BY experiment_id, update_date DESC, id DESC",
        PROGRESS_UPDATE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], progress_update_from_row)?;
    let mut by_parent: HashMap<i64, Vec<ProgressUpdate>> = HashMap::new();
    for r in rows {
        let update = r?;
        by_parent.entry(update.experiment_id).or_default().push(update);
    }

    Ok(experiments
        .into_iter()
        .map(|experiment| {
            let progress_updates = by_parent.remove(&experiment.id).unwrap_or_default();
            ExperimentWithUpdates {
                experiment,
                progress_updates,
            }
        })
        .collect())
}

/// Insert an experiment row with explicit timestamps. Maps a name clash to
/// `ConstraintViolation`; other store rejections are returned as `StoreError`.
pub(crate) fn insert_experiment_row(
    conn: &Connection,
    fields: &NewExperiment,
    created_at: &str,
    updated_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO experiments(name, why, how, expectation, status, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fields.name,
            fields.why,
            fields.how,
            fields.expectation,
            fields.status,
            created_at,
            updated_at
        ],
    )
    .map_err(|e| {
        if error::is_unique_violation(&e) {
            duplicate_name(&fields.name)
        } else {
            LabbookError::StoreError(e)
        }
    })?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_progress_update_row(
    conn: &Connection,
    experiment_id: i64,
    text: &str,
    update_date: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO progress_updates(experiment_id, update_text, update_date) VALUES(?1, ?2, ?3)",
        params![experiment_id, text, update_date],
    )?;
    Ok(conn.last_insert_rowid())
}

fn stamp_experiment(conn: &Connection, id: i64, previous: &str, store: &Store) -> Result<String> {
    let stamp = time::next_stamp(Some(previous), store.now());
    conn.execute(
        "UPDATE experiments SET updated_at = ?1 WHERE id = ?2",
        params![stamp, id],
    )?;
    Ok(stamp)
}

// --- Public operations ---

/// All experiments, most recently updated first.
pub fn list_experiments(store: &Store) -> Result<Vec<Experiment>> {
    store.with_conn("experiments.list", |conn| fetch_all_experiments(conn))
}

/// The experiment with its notes, or `None` when `id` does not exist.
pub fn get_experiment(store: &Store, id: i64) -> Result<Option<ExperimentWithUpdates>> {
    store.with_read("experiments.get", |tx| {
        let Some(experiment) = fetch_experiment(tx, id)? else {
            return Ok(None);
        };
        let progress_updates = fetch_progress_updates(tx, id)?;
        Ok(Some(ExperimentWithUpdates {
            experiment,
            progress_updates,
        }))
    })
}

/// Every experiment with its notes, read as one consistent snapshot.
pub fn load_all(store: &Store) -> Result<Vec<ExperimentWithUpdates>> {
    store.with_read("experiments.load_all", |tx| fetch_all_with_updates(tx))
}

pub fn create_experiment(store: &Store, fields: &NewExperiment) -> Result<Experiment> {
    fields.validate()?;
    let now = time::next_stamp(None, store.now());

    store.with_write("experiments.create", |tx| {
        let id = insert_experiment_row(tx, fields, &now, &now)?;
        fetch_experiment(tx, id)?.ok_or_else(|| experiment_missing(id))
    })
}

/// Apply the supplied fields and always refresh `updated_at`, which strictly
/// increases even for an empty patch.
pub fn update_experiment(store: &Store, id: i64, patch: &ExperimentPatch) -> Result<Experiment> {
    patch.validate()?;

    store.with_write("experiments.update", |tx| {
        let current = fetch_experiment(tx, id)?.ok_or_else(|| experiment_missing(id))?;
        let stamp = time::next_stamp(Some(&current.updated_at), store.now());

        let assignments = patch.assignments();
        let mut set_clause: Vec<String> = Vec::with_capacity(assignments.len() + 1);
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(assignments.len() + 2);
        for (column, value) in &assignments {
            values.push(*value);
            set_clause.push(format!("{} = ?{}", column, values.len()));
        }
        values.push(&stamp);
        set_clause.push(format!("updated_at = ?{}", values.len()));
        values.push(&id);
        let sql = format!(
            "UPDATE experiments SET {} WHERE id = ?{}",
            set_clause.join(", "),
            values.len()
        );

        tx.execute(&sql, values.as_slice()).map_err(|e| {
            if error::is_unique_violation(&e) {
                duplicate_name(patch.name.as_deref().unwrap_or(&current.name))
            } else {
                LabbookError::StoreError(e)
            }
        })?;

        fetch_experiment(tx, id)?.ok_or_else(|| experiment_missing(id))
    })
}

/// Delete the experiment; its notes go with it in the same transaction.
/// Returns whether a row was removed.
pub fn delete_experiment(store: &Store, id: i64) -> Result<bool> {
    store.with_write("experiments.delete", |tx| {
        let changed = tx.execute("DELETE FROM experiments WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Append a note and refresh the parent's `updated_at` atomically.
pub fn add_progress_update(store: &Store, experiment_id: i64, text: &str) -> Result<ProgressUpdate> {
    require("update_text", text)?;

    store.with_write("experiments.add_progress_update", |tx| {
        let parent = fetch_experiment(tx, experiment_id)?
            .ok_or_else(|| experiment_missing(experiment_id))?;
        let update_date = time::next_stamp(None, store.now());
        let id = insert_progress_update_row(tx, experiment_id, text, &update_date)?;
        stamp_experiment(tx, experiment_id, &parent.updated_at, store)?;

        let sql = format!("SELECT {} FROM progress_updates WHERE id = ?1", PROGRESS_UPDATE_COLUMNS);
        Ok(tx.query_row(&sql, params![id], progress_update_from_row)?)
    })
}

/// Notes for one experiment, newest first. Empty when the experiment is absent.
pub fn list_progress_updates(store: &Store, experiment_id: i64) -> Result<Vec<ProgressUpdate>> {
    store.with_conn("experiments.list_progress_updates", |conn| {
        fetch_progress_updates(conn, experiment_id)
    })
}

pub fn get_progress_update(store: &Store, id: i64) -> Result<Option<ProgressUpdate>> {
    store.with_conn("experiments.get_progress_update", |conn| {
        let sql = format!("SELECT {} FROM progress_updates WHERE id = ?1", PROGRESS_UPDATE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], progress_update_from_row)
            .optional()?)
    })
}
