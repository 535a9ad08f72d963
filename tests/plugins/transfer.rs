use chrono::{Duration, TimeZone, Utc};
use labbook::core::config::StoreConfig;
use labbook::core::error::LabbookError;
use labbook::core::store::Store;
use labbook::core::time::ManualClock;
use labbook::plugins::experiments::{self, ExperimentPatch, ExperimentStatus, NewExperiment};
use labbook::plugins::transfer::{self, ConflictPolicy};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn seeded_store() -> Store {
    seeded().0
}

fn seeded() -> (Store, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap(),
    ));
    let store = Store::open_with_clock(&StoreConfig::in_memory(), clock.clone()).unwrap();

    let sleep = experiments::create_experiment(
        &store,
        &NewExperiment::new("Sleep earlier", "Tired", "Bed by 22:00", "More energy")
            .with_status(ExperimentStatus::InProgress),
    )
    .unwrap();
    clock.advance(Duration::minutes(1));
    experiments::create_experiment(
        &store,
        &NewExperiment::new("No coffee", "Jitters", "Stop for two weeks", "Calmer"),
    )
    .unwrap();
    clock.advance(Duration::minutes(1));
    experiments::add_progress_update(&store, sleep.id, "Week one done").unwrap();
    clock.advance(Duration::minutes(1));
    experiments::add_progress_update(&store, sleep.id, "Week two done").unwrap();
    (store, clock)
}

fn counts(store: &Store) -> (i64, i64) {
    store
        .with_conn("test.counts", |conn| {
            let e = conn.query_row("SELECT COUNT(*) FROM experiments", [], |r| r.get(0))?;
            let p = conn.query_row("SELECT COUNT(*) FROM progress_updates", [], |r| r.get(0))?;
            Ok((e, p))
        })
        .unwrap()
}

#[test]
fn test_export_wraps_experiments_with_updates() {
    let store = seeded_store();
    let doc = transfer::export_json(&store).unwrap();

    let obj = doc.as_object().unwrap();
    assert_eq!(obj.len(), 1);
    let items = doc["experiments"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], "Sleep earlier");
    assert_eq!(items[0]["status"], "In Progress");
    let notes = items[0]["progress_updates"].as_array().unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0]["update_text"], "Week two done");
    assert!(items[1]["progress_updates"].as_array().unwrap().is_empty());
}

#[test]
fn test_reimporting_export_skips_every_entry() {
    let store = seeded_store();
    let before = transfer::export_json(&store).unwrap();

    let report = transfer::import_all(&store, &before, ConflictPolicy::Skip).unwrap();
    assert!(report.success);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.failed, 0);
    assert!(report.message.contains("2 skipped"), "{}", report.message);

    assert_eq!(counts(&store), (2, 2));
    assert_eq!(transfer::export_json(&store).unwrap(), before);
}

#[test]
fn test_reimporting_export_with_overwrite_adds_no_rows() {
    let store = seeded_store();
    let before = transfer::export_all(&store).unwrap();
    let doc = serde_json::to_value(&before).unwrap();

    let report = transfer::import_all(&store, &doc, ConflictPolicy::Overwrite).unwrap();
    assert!(report.success);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.overwritten, 2);
    assert_eq!(counts(&store), (2, 2));

    let after = transfer::export_all(&store).unwrap();
    for b in &before.experiments {
        let a = after
            .experiments
            .iter()
            .find(|a| a.experiment.name == b.experiment.name)
            .unwrap();
        assert_eq!(a.experiment.id, b.experiment.id);
        assert_eq!(a.experiment.why, b.experiment.why);
        assert_eq!(a.experiment.how, b.experiment.how);
        assert_eq!(a.experiment.expectation, b.experiment.expectation);
        assert_eq!(a.experiment.status, b.experiment.status);
        assert_eq!(a.experiment.created_at, b.experiment.created_at);
        assert!(a.experiment.updated_at > b.experiment.updated_at);
        let b_notes: Vec<(&str, &str)> = b
            .progress_updates
            .iter()
            .map(|u| (u.update_text.as_str(), u.update_date.as_str()))
            .collect();
        let a_notes: Vec<(&str, &str)> = a
            .progress_updates
            .iter()
            .map(|u| (u.update_text.as_str(), u.update_date.as_str()))
            .collect();
        assert_eq!(a_notes, b_notes);
    }
}

#[test]
fn test_overwrite_replaces_fields_and_notes() {
    let store = seeded_store();
    let doc = json!({ "experiments": [{
        "name": "No coffee",
        "why": "Jitters",
        "how": "Stop for a month",
        "expectation": "Calmer",
        "status": "Cancelled",
        "created_at": "2024-01-01T00:00:00.000Z",
        "updated_at": "2024-01-05T00:00:00.000Z",
        "progress_updates": [ { "update_text": "Gave up", "update_date": "2024-01-05T00:00:00.000Z" } ]
    }]});

    let report = transfer::import_all(&store, &doc, ConflictPolicy::Overwrite).unwrap();
    assert_eq!(report.overwritten, 1);

    let listed = experiments::list_experiments(&store).unwrap();
    let coffee = listed.iter().find(|e| e.name == "No coffee").unwrap();
    assert_eq!(coffee.status, ExperimentStatus::Cancelled);
    assert_eq!(coffee.how, "Stop for a month");
    let notes = experiments::list_progress_updates(&store, coffee.id).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].update_text, "Gave up");
}

#[test]
fn test_import_into_empty_store_recreates_dataset() {
    let source = seeded_store();
    let doc = transfer::export_json(&source).unwrap();

    let target = Store::open_in_memory().unwrap();
    let report = transfer::import_all(&target, &doc, ConflictPolicy::Skip).unwrap();
    assert!(report.success);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.progress_updates, 2);

    let src = transfer::export_all(&source).unwrap();
    let dst = transfer::export_all(&target).unwrap();
    assert_eq!(src.experiments.len(), dst.experiments.len());
    for (s, d) in src.experiments.iter().zip(dst.experiments.iter()) {
        assert_eq!(s.experiment.name, d.experiment.name);
        assert_eq!(s.experiment.status, d.experiment.status);
        assert_eq!(s.experiment.created_at, d.experiment.created_at);
        assert_eq!(s.experiment.updated_at, d.experiment.updated_at);
        let s_texts: Vec<&str> = s.progress_updates.iter().map(|u| u.update_text.as_str()).collect();
        let d_texts: Vec<&str> = d.progress_updates.iter().map(|u| u.update_text.as_str()).collect();
        assert_eq!(s_texts, d_texts);
    }
}

#[test]
fn test_missing_wrapper_key_is_rejected_without_writes() {
    let store = seeded_store();
    let before = transfer::export_json(&store).unwrap();

    let doc = json!({ "data": [
        { "name": "Sneaky", "why": "w", "how": "h", "expectation": "e", "status": "Planned" }
    ]});
    let err = transfer::import_all(&store, &doc, ConflictPolicy::Skip).unwrap_err();
    assert!(matches!(err, LabbookError::ValidationError(_)), "{err}");

    assert_eq!(transfer::export_json(&store).unwrap(), before);
}

#[test]
fn test_one_malformed_entry_aborts_whole_import() {
    let store = Store::open_in_memory().unwrap();
    let doc = json!({ "experiments": [
        { "name": "Fine", "why": "w", "how": "h", "expectation": "e", "status": "Planned" },
        { "name": "Broken", "why": "w", "how": "h", "expectation": "e" }
    ]});

    let err = transfer::import_all(&store, &doc, ConflictPolicy::Skip).unwrap_err();
    assert!(matches!(err, LabbookError::ValidationError(_)), "{err}");
    assert_eq!(counts(&store), (0, 0));
}

#[test]
fn test_fail_fast_rolls_back_earlier_entries() {
    let store = seeded_store();
    let doc = json!({ "experiments": [
        { "name": "Brand new", "why": "w", "how": "h", "expectation": "e", "status": "Planned" },
        { "name": "No coffee", "why": "w", "how": "h", "expectation": "e", "status": "Planned" }
    ]});

    let err = transfer::import_all(&store, &doc, ConflictPolicy::FailFast).unwrap_err();
    assert!(matches!(err, LabbookError::ConstraintViolation(_)), "{err}");
    assert_eq!(counts(&store), (2, 2));
    assert!(experiments::list_experiments(&store)
        .unwrap()
        .iter()
        .all(|e| e.name != "Brand new"));
}

#[test]
fn test_store_rejected_entry_is_reported_and_others_land() {
    let store = Store::open_in_memory().unwrap();
    let doc = json!({ "experiments": [
        { "name": "Good", "why": "w", "how": "h", "expectation": "e", "status": "Completed",
          "progress_updates": [ { "update_text": "done" } ] },
        { "name": "Time traveller", "why": "w", "how": "h", "expectation": "e", "status": "Planned",
          "created_at": "2024-05-01T00:00:00.000Z", "updated_at": "2024-04-01T00:00:00.000Z",
          "progress_updates": [ { "update_text": "lost" } ] }
    ]});

    let report = transfer::import_all(&store, &doc, ConflictPolicy::Skip).unwrap();
    assert!(!report.success);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.failures[0].name, "Time traveller");
    assert_eq!(counts(&store), (1, 1));
}

#[test]
fn test_overwrite_never_moves_updated_at_backwards() {
    let (store, clock) = seeded();
    let stale_export = transfer::export_json(&store).unwrap();

    clock.advance(Duration::minutes(5));
    let coffee = experiments::list_experiments(&store)
        .unwrap()
        .into_iter()
        .find(|e| e.name == "No coffee")
        .unwrap();
    let edited = experiments::update_experiment(
        &store,
        coffee.id,
        &ExperimentPatch::new().status(ExperimentStatus::Completed),
    )
    .unwrap();

    let report = transfer::import_all(&store, &stale_export, ConflictPolicy::Overwrite).unwrap();
    assert_eq!(report.overwritten, 2);

    let after = experiments::get_experiment(&store, coffee.id).unwrap().unwrap().experiment;
    assert_eq!(after.status, ExperimentStatus::Planned);
    assert!(after.updated_at > edited.updated_at, "{} <= {}", after.updated_at, edited.updated_at);
    assert!(after.created_at <= after.updated_at);
    assert_eq!(experiments::list_experiments(&store).unwrap()[0].name, "No coffee");
}

#[test]
fn test_overwrite_keeps_newer_imported_stamp() {
    let (store, _clock) = seeded();
    let doc = json!({ "experiments": [{
        "name": "Sleep earlier", "why": "w", "how": "h", "expectation": "e", "status": "Completed",
        "created_at": "2024-01-01T00:00:00.000Z",
        "updated_at": "2030-01-01T00:00:00.000Z"
    }]});

    transfer::import_all(&store, &doc, ConflictPolicy::Overwrite).unwrap();
    let sleep = experiments::list_experiments(&store).unwrap().remove(0);
    assert_eq!(sleep.name, "Sleep earlier");
    assert_eq!(sleep.updated_at, "2030-01-01T00:00:00.000Z");
    assert_eq!(sleep.created_at, "2024-01-01T00:00:00.000Z");
}

#[test]
fn test_duplicate_names_inside_one_document_are_counted_once() {
    let entry = json!({ "name": "Twice", "why": "w", "how": "h", "expectation": "e", "status": "Planned" });
    let doc = json!({ "experiments": [entry.clone(), entry] });

    for policy in [ConflictPolicy::Skip, ConflictPolicy::Overwrite, ConflictPolicy::FailFast] {
        let store = Store::open_in_memory().unwrap();
        let report = transfer::import_all(&store, &doc, policy).unwrap();
        assert_eq!(report.inserted, 1, "{policy}");
        assert_eq!(report.overwritten, 0, "{policy}");
        assert_eq!(report.skipped, 0, "{policy}");
        assert_eq!(report.duplicates, 1, "{policy}");
        assert!(report.success);
        assert_eq!(counts(&store).0, 1);
    }
}

#[test]
fn test_file_round_trip() {
    let tmp = tempdir().unwrap();
    let store = seeded_store();
    let path = tmp
        .path()
        .join(transfer::export_file_name(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));

    let written = transfer::export_to_path(&store, &path).unwrap();
    assert_eq!(written, 2);
    assert!(path.ends_with("experiments-export-2024-02-01.json"));

    let target = Store::open_in_memory().unwrap();
    let report = transfer::import_from_path(&target, &path, ConflictPolicy::Skip).unwrap();
    assert_eq!(report.inserted, 2);
}

#[test]
fn test_unparseable_file_is_validation_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("broken.json");
    std::fs::write(&path, "{ \"experiments\": [ ").unwrap();

    let store = Store::open_in_memory().unwrap();
    let err = transfer::import_from_path(&store, &path, ConflictPolicy::Skip).unwrap_err();
    assert!(matches!(err, LabbookError::ValidationError(_)), "{err}");
}
