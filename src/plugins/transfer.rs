//! JSON export and import of the whole dataset.
//!
//! Document shape: `{ "experiments": [ { ..experiment, "progress_updates": [..] } ] }`.
//! Import validates the entire document before writing anything, then applies
//! every entry inside one transaction.

use crate::core::error::{self, LabbookError, Result};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::experiments::{
    self, Experiment, ExperimentStatus, ExperimentWithUpdates, NewExperiment,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub use crate::core::config::{ConflictPolicy, parse_conflict_policy};

pub const DOCUMENT_KEY: &str = "experiments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDocument {
    pub experiments: Vec<ExperimentWithUpdates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub success: bool,
    pub message: String,
    pub inserted: usize,
    pub overwritten: usize,
    pub skipped: usize,
    /// Entries whose name already appeared earlier in the same document.
    pub duplicates: usize,
    pub failed: usize,
    pub progress_updates: usize,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    fn finish(mut self, policy: ConflictPolicy) -> Self {
        self.failed = self.failures.len();
        self.success = self.failed == 0;
        self.message = format!(
            "Imported {} experiment(s) with {} progress update(s): {} overwritten, {} skipped, {} duplicate(s), {} failed (policy: {})",
            self.inserted,
            self.progress_updates,
            self.overwritten,
            self.skipped,
            self.duplicates,
            self.failed,
            policy
        );
        self
    }
}

#[derive(Debug, Deserialize)]
struct ImportEntry {
    name: String,
    why: String,
    how: String,
    expectation: String,
    status: ExperimentStatus,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    progress_updates: Vec<ImportUpdate>,
}

#[derive(Debug, Deserialize)]
struct ImportUpdate {
    update_text: String,
    update_date: Option<String>,
}

/// An entry that passed shape validation, with timestamps in stored format.
#[derive(Debug)]
struct ValidEntry {
    fields: NewExperiment,
    created_at: String,
    updated_at: String,
    updates: Vec<(String, String)>,
}

pub fn export_all(store: &Store) -> Result<TransferDocument> {
    let experiments = experiments::load_all(store)?;
    Ok(TransferDocument { experiments })
}

pub fn export_json(store: &Store) -> Result<JsonValue> {
    let doc = export_all(store)?;
    Ok(serde_json::to_value(doc)?)
}

/// `experiments-export-YYYY-MM-DD.json`
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("experiments-export-{}.json", time::date_stamp(now))
}

/// Write the pretty-printed export to `path`. Returns the number of experiments written.
pub fn export_to_path(store: &Store, path: &Path) -> Result<usize> {
    let doc = export_all(store)?;
    let body = serde_json::to_string_pretty(&doc)?;
    fs::write(path, body).map_err(LabbookError::IoError)?;
    info!(path = %path.display(), experiments = doc.experiments.len(), "export written");
    Ok(doc.experiments.len())
}

pub fn import_from_path(store: &Store, path: &Path, policy: ConflictPolicy) -> Result<ImportReport> {
    let content = fs::read_to_string(path).map_err(LabbookError::IoError)?;
    let doc: JsonValue = serde_json::from_str(&content).map_err(|e| {
        LabbookError::ValidationError(format!("{} is not valid JSON: {}", path.display(), e))
    })?;
    import_all(store, &doc, policy)
}

/// Import a transfer document. Malformed input is rejected before any write.
pub fn import_all(store: &Store, doc: &JsonValue, policy: ConflictPolicy) -> Result<ImportReport> {
    let now = time::next_stamp(None, store.now());
    let entries = parse_document(doc, &now)?;

    let report = store.with_write("transfer.import", |tx| {
        let mut report = ImportReport::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            // Only the first entry with a given name is applied.
            if !seen.insert(entry.fields.name.as_str()) {
                report.duplicates += 1;
                continue;
            }

            let existing = experiments::fetch_experiment_by_name(tx, &entry.fields.name)?;
            if existing.is_some() {
                match policy {
                    ConflictPolicy::Skip => {
                        report.skipped += 1;
                        continue;
                    }
                    ConflictPolicy::FailFast => {
                        return Err(LabbookError::ConstraintViolation(format!(
                            "experiments[{}]: an experiment named '{}' already exists",
                            index, entry.fields.name
                        )));
                    }
                    ConflictPolicy::Overwrite => {}
                }
            }

            let sp = tx.savepoint()?;
            let outcome = match &existing {
                Some(current) => overwrite_entry(&sp, current, entry, store.now()),
                None => insert_entry(&sp, entry),
            };
            match outcome {
                Ok(()) => {
                    sp.commit()?;
                    if existing.is_some() {
                        report.overwritten += 1;
                    } else {
                        report.inserted += 1;
                    }
                    report.progress_updates += entry.updates.len();
                }
                Err(e) if is_entry_rejection(&e) => {
                    // Dropping the savepoint rolls back this entry only.
                    drop(sp);
                    warn!(index, name = %entry.fields.name, error = %e, "import entry rejected");
                    report.failures.push(ImportFailure {
                        index,
                        name: entry.fields.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report.finish(policy))
    })?;

    info!(
        inserted = report.inserted,
        overwritten = report.overwritten,
        skipped = report.skipped,
        duplicates = report.duplicates,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

fn is_entry_rejection(err: &LabbookError) -> bool {
    match err {
        LabbookError::ConstraintViolation(_) => true,
        LabbookError::StoreError(e) => error::is_constraint_violation(e),
        _ => false,
    }
}

fn insert_entry(conn: &Connection, entry: &ValidEntry) -> Result<()> {
    let id = experiments::insert_experiment_row(
        conn,
        &entry.fields,
        &entry.created_at,
        &entry.updated_at,
    )?;
    insert_updates(conn, id, entry)
}

/// Replace an existing row's fields and notes. `updated_at` never moves
/// backwards: it is the later of the entry's stamp and the row's next stamp.
fn overwrite_entry(
    conn: &Connection,
    current: &Experiment,
    entry: &ValidEntry,
    now: DateTime<Utc>,
) -> Result<()> {
    let refreshed = time::next_stamp(Some(&current.updated_at), now);
    let updated_at = entry.updated_at.as_str().max(refreshed.as_str());
    let created_at = entry.created_at.as_str().min(updated_at);
    let id = current.id;
    conn.execute(
        "UPDATE experiments
         SET why = ?1, how = ?2, expectation = ?3, status = ?4, created_at = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            entry.fields.why,
            entry.fields.how,
            entry.fields.expectation,
            entry.fields.status,
            created_at,
            updated_at,
            id
        ],
    )?;
    conn.execute(
        "DELETE FROM progress_updates WHERE experiment_id = ?1",
        params![id],
    )?;
    insert_updates(conn, id, entry)
}

fn insert_updates(conn: &Connection, experiment_id: i64, entry: &ValidEntry) -> Result<()> {
    // Oldest first so store-assigned ids follow note order.
    for (text, date) in entry.updates.iter().rev() {
        experiments::insert_progress_update_row(conn, experiment_id, text, date)?;
    }
    Ok(())
}

fn parse_document(doc: &JsonValue, now: &str) -> Result<Vec<ValidEntry>> {
    let obj = doc.as_object().ok_or_else(|| {
        LabbookError::ValidationError("import document must be a JSON object".to_string())
    })?;
    if let Some(extra) = obj.keys().find(|k| k.as_str() != DOCUMENT_KEY) {
        return Err(LabbookError::ValidationError(format!(
            "unexpected top-level key '{}'; expected only '{}'",
            extra, DOCUMENT_KEY
        )));
    }
    let items = obj
        .get(DOCUMENT_KEY)
        .ok_or_else(|| {
            LabbookError::ValidationError(format!("missing top-level key '{}'", DOCUMENT_KEY))
        })?
        .as_array()
        .ok_or_else(|| {
            LabbookError::ValidationError(format!("'{}' must be an array", DOCUMENT_KEY))
        })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            parse_entry(item, now).map_err(|e| match e {
                LabbookError::ValidationError(msg) => {
                    LabbookError::ValidationError(format!("experiments[{}]: {}", index, msg))
                }
                other => other,
            })
        })
        .collect()
}

fn parse_entry(item: &JsonValue, now: &str) -> Result<ValidEntry> {
    let entry: ImportEntry = serde_json::from_value(item.clone())
        .map_err(|e| LabbookError::ValidationError(e.to_string()))?;

    let fields = NewExperiment {
        name: entry.name,
        why: entry.why,
        how: entry.how,
        expectation: entry.expectation,
        status: entry.status,
    };
    fields.validate()?;

    let created_at = match entry.created_at.as_deref() {
        Some(raw) => time::normalize_ts(raw)?,
        None => now.to_string(),
    };
    let updated_at = match entry.updated_at.as_deref() {
        Some(raw) => time::normalize_ts(raw)?,
        None => created_at.clone(),
    };

    let mut updates = Vec::with_capacity(entry.progress_updates.len());
    for (i, update) in entry.progress_updates.into_iter().enumerate() {
        if update.update_text.trim().is_empty() {
            return Err(LabbookError::ValidationError(format!(
                "progress_updates[{}]: update_text is required",
                i
            )));
        }
        let date = match update.update_date.as_deref() {
            Some(raw) => time::normalize_ts(raw)?,
            None => now.to_string(),
        };
        updates.push((update.update_text, date));
    }

    Ok(ValidEntry {
        fields,
        created_at,
        updated_at,
        updates,
    })
}
