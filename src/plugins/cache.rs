//! Client-side state for the experiment collection.
//!
//! One cached collection, "all experiments with their progress updates", kept
//! with an invalidate-and-refetch discipline: every successful mutation marks
//! the collection stale and the next read reloads it whole.
//!
//! State machine: `Idle -> Loading -> Ready | Error`. A successful mutation
//! moves `Ready`/`Error` back to `Loading` (keeping the previous snapshot)
//! until the next read refetches. The snapshot is
//! replaced in one step under the state lock, so readers see the old snapshot
//! or the new one, never a mix.
//!
//! Fetches are single-flighted by `fetch_lock`. Mutations take the same lock,
//! so nothing mutates the store while this collection is `Loading`.

use crate::core::error::Result;
use crate::core::store::Store;
use crate::plugins::experiments::{
    self, Experiment, ExperimentPatch, ExperimentWithUpdates, NewExperiment, ProgressUpdate,
};
use crate::plugins::transfer::{self, ConflictPolicy, ImportReport};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

pub type Snapshot = Arc<Vec<ExperimentWithUpdates>>;

/// What the view layer sees. `Ready` with an empty snapshot is "empty",
/// distinct from `Loading` and `Error`.
#[derive(Debug, Clone)]
pub enum CacheView {
    Idle,
    Loading { previous: Option<Snapshot> },
    Ready(Snapshot),
    Error(String),
}

impl CacheView {
    pub fn is_loading(&self) -> bool {
        matches!(self, CacheView::Loading { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CacheView::Error(_))
    }

    /// True only for a loaded, empty collection.
    pub fn is_empty(&self) -> bool {
        matches!(self, CacheView::Ready(snapshot) if snapshot.is_empty())
    }

    /// The freshest complete snapshot this view can offer.
    pub fn snapshot(&self) -> Option<Snapshot> {
        match self {
            CacheView::Ready(snapshot) => Some(snapshot.clone()),
            CacheView::Loading { previous } => previous.clone(),
            CacheView::Idle | CacheView::Error(_) => None,
        }
    }

    pub fn find(&self, id: i64) -> Option<ExperimentWithUpdates> {
        self.snapshot()?
            .iter()
            .find(|e| e.experiment.id == id)
            .cloned()
    }
}

#[derive(Debug)]
struct CacheState {
    view: CacheView,
    /// Invalidation generation the current `Ready`/`Error` was fetched at.
    fetched_generation: Option<u64>,
}

pub struct ExperimentCache {
    store: Arc<Store>,
    import_policy: ConflictPolicy,
    state: RwLock<CacheState>,
    fetch_lock: Mutex<()>,
    generation: AtomicU64,
    fetches: AtomicU64,
}

impl ExperimentCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_import_policy(store, ConflictPolicy::default())
    }

    pub fn with_import_policy(store: Arc<Store>, import_policy: ConflictPolicy) -> Self {
        Self {
            store,
            import_policy,
            state: RwLock::new(CacheState {
                view: CacheView::Idle,
                fetched_generation: None,
            }),
            fetch_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Number of store round trips made to fill the cache.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Current view without triggering a fetch. A stale `Ready` or `Error`
    /// reports `Loading` with whatever snapshot it still holds.
    pub fn peek(&self) -> CacheView {
        let current = self.generation.load(Ordering::SeqCst);
        let state = self.read_state();
        let stale = state.fetched_generation.is_some_and(|fetched| fetched < current);
        match &state.view {
            CacheView::Ready(_) | CacheView::Error(_) if stale => CacheView::Loading {
                previous: state.view.snapshot(),
            },
            view => view.clone(),
        }
    }

    pub fn is_stale(&self) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        match self.read_state().fetched_generation {
            Some(fetched) => fetched < current,
            None => true,
        }
    }

    /// Return a terminal view (`Ready` or `Error`), refetching first if the
    /// collection is idle or stale. A stored `Error` is returned as is until
    /// the next invalidation or `refresh`.
    pub fn load(&self) -> CacheView {
        if let Some(view) = self.fresh_view() {
            return view;
        }
        let _fetching = self.lock_fetch();
        // Another caller may have finished the fetch we queued behind.
        if let Some(view) = self.fresh_view() {
            return view;
        }
        self.fetch_locked()
    }

    /// User-initiated reload.
    pub fn refresh(&self) -> CacheView {
        self.invalidate();
        self.load()
    }

    /// Mark the collection stale. The next `load` refetches.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "experiment cache invalidated");
    }

    /// Convenience for list screens: the loaded collection or the fetch error.
    pub fn experiments(&self) -> std::result::Result<Snapshot, String> {
        match self.load() {
            CacheView::Ready(snapshot) => Ok(snapshot),
            CacheView::Error(reason) => Err(reason),
            other => Err(format!("experiment cache not ready: {:?}", other)),
        }
    }

    /// Detail screens read the store directly, as the collection may be stale.
    pub fn get_experiment(&self, id: i64) -> Result<Option<ExperimentWithUpdates>> {
        experiments::get_experiment(&self.store, id)
    }

    pub fn create_experiment(&self, fields: &NewExperiment) -> Result<Experiment> {
        self.mutate(|store| experiments::create_experiment(store, fields))
    }

    pub fn update_experiment(&self, id: i64, patch: &ExperimentPatch) -> Result<Experiment> {
        self.mutate(|store| experiments::update_experiment(store, id, patch))
    }

    pub fn delete_experiment(&self, id: i64) -> Result<bool> {
        self.mutate(|store| experiments::delete_experiment(store, id))
    }

    pub fn add_progress_update(&self, experiment_id: i64, text: &str) -> Result<ProgressUpdate> {
        self.mutate(|store| experiments::add_progress_update(store, experiment_id, text))
    }

    pub fn import_all(&self, doc: &JsonValue) -> Result<ImportReport> {
        let policy = self.import_policy;
        self.mutate(|store| transfer::import_all(store, doc, policy))
    }

    pub fn export_all(&self) -> Result<transfer::TransferDocument> {
        transfer::export_all(&self.store)
    }

    /// Run a mutation with the fetch lock held; invalidate only on success.
    fn mutate<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Store) -> Result<R>,
    {
        let _fetching = self.lock_fetch();
        let result = f(&self.store);
        if result.is_ok() {
            self.invalidate();
        }
        result
    }

    /// The stored view, if it was fetched at the current generation.
    fn fresh_view(&self) -> Option<CacheView> {
        let current = self.generation.load(Ordering::SeqCst);
        let state = self.read_state();
        match state.fetched_generation {
            Some(fetched) if fetched >= current => Some(state.view.clone()),
            _ => None,
        }
    }

    /// Caller holds `fetch_lock`.
    fn fetch_locked(&self) -> CacheView {
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let mut state = self.write_state();
            let previous = state.view.snapshot();
            state.view = CacheView::Loading { previous };
        }

        self.fetches.fetch_add(1, Ordering::SeqCst);
        let view = match experiments::load_all(&self.store) {
            Ok(rows) => CacheView::Ready(Arc::new(rows)),
            Err(e) => {
                warn!(error = %e, "experiment cache fetch failed");
                CacheView::Error(e.to_string())
            }
        };

        let mut state = self.write_state();
        state.view = view.clone();
        state.fetched_generation = Some(generation);
        view
    }

    fn lock_fetch(&self) -> MutexGuard<'_, ()> {
        self.fetch_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
