use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fxhash::FxHashMap;

use crate::core::geo::LatLng;
use crate::markers::spec::MarkerSpec;
use crate::surface::adapter::AnnotationHandle;

/// Runtime state of one marker
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    /// Visual configuration and current position
    pub spec: MarkerSpec,
    /// Annotation currently attached on the surface, if rendered
    pub handle: Option<AnnotationHandle>,
    /// Unique per insertion; distinguishes a re-added id from its predecessor
    pub instance: u64,
    /// Bumped whenever the marker's artwork source changes
    pub revision: u64,
}

impl MarkerState {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn position(&self) -> LatLng {
        self.spec.position
    }
}

/// Outcome of a position write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionWrite {
    Applied,
    /// No marker with that id
    Missing,
    /// The store was cleared since the caller captured its epoch
    Stale,
}

#[derive(Debug, Default)]
struct StoreInner {
    markers: FxHashMap<String, MarkerState>,
    epoch: u64,
    next_serial: u64,
}

impl StoreInner {
    fn serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }
}

/// Authoritative map from marker id to marker state.
///
/// Reads are concurrent; writes are serialized. Mutating methods accept a
/// hook that runs while the write lock is held, so the matching surface
/// command is enqueued in the same order as the store change. Clearing
/// bumps the epoch; writers that captured an older epoch are rejected,
/// which keeps late async completions from resurrecting cleared markers.
#[derive(Debug, Default)]
pub struct MarkerStore {
    inner: RwLock<StoreInner>,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current clear generation
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn len(&self) -> usize {
        self.read().markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().markers.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<MarkerState> {
        self.read().markers.get(id).cloned()
    }

    pub fn position(&self, id: &str) -> Option<LatLng> {
        self.read().markers.get(id).map(MarkerState::position)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.read().markers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cloned states, sorted by id
    pub fn snapshot(&self) -> Vec<MarkerState> {
        let mut markers: Vec<_> = self.read().markers.values().cloned().collect();
        markers.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        markers
    }

    /// Insert a marker unless the id exists or the epoch moved on.
    /// Returns the inserted state.
    pub fn insert_if_absent<F>(&self, spec: MarkerSpec, epoch: u64, on_insert: F) -> Option<MarkerState>
    where
        F: FnOnce(&MarkerState),
    {
        let mut inner = self.write();
        if inner.epoch != epoch || inner.markers.contains_key(&spec.id) {
            return None;
        }
        let instance = inner.serial();
        let state = MarkerState {
            spec,
            handle: None,
            instance,
            revision: instance,
        };
        on_insert(&state);
        inner.markers.insert(state.spec.id.clone(), state.clone());
        Some(state)
    }

    /// Move a marker, running `on_apply` under the lock
    pub fn set_position<F>(&self, id: &str, position: LatLng, epoch: u64, on_apply: F) -> PositionWrite
    where
        F: FnOnce(&MarkerState),
    {
        let mut inner = self.write();
        if inner.epoch != epoch {
            return PositionWrite::Stale;
        }
        match inner.markers.get_mut(id) {
            Some(state) => {
                state.spec.position = position;
                on_apply(state);
                PositionWrite::Applied
            }
            None => PositionWrite::Missing,
        }
    }

    /// Record a new avatar URL. Returns the updated state when the URL
    /// actually changed; the revision is bumped so in-flight loads for the
    /// previous artwork are discarded.
    pub fn set_avatar(&self, id: &str, url: &str) -> Option<MarkerState> {
        let mut inner = self.write();
        let revision = inner.serial();
        let state = inner.markers.get_mut(id)?;
        if state.spec.avatar_url.as_deref() == Some(url) {
            return None;
        }
        state.spec.avatar_url = Some(url.to_string());
        state.revision = revision;
        Some(state.clone())
    }

    /// Mirror the surface handle onto the marker it was attached for
    pub fn set_handle(&self, id: &str, instance: u64, handle: Option<AnnotationHandle>) -> bool {
        let mut inner = self.write();
        match inner.markers.get_mut(id) {
            Some(state) if state.instance == instance => {
                state.handle = handle;
                true
            }
            _ => false,
        }
    }

    /// Run `f` only if the marker still exists with the given instance and
    /// revision in the given epoch. The read lock is held while `f` runs.
    pub fn with_current<F>(&self, id: &str, instance: u64, revision: u64, epoch: u64, f: F) -> bool
    where
        F: FnOnce(&MarkerState),
    {
        let inner = self.read();
        if inner.epoch != epoch {
            return false;
        }
        match inner.markers.get(id) {
            Some(state) if state.instance == instance && state.revision == revision => {
                f(state);
                true
            }
            _ => false,
        }
    }

    /// Remove the given ids; unknown ids are ignored. `on_removed` receives
    /// the ids that were present, under the lock.
    pub fn remove<F>(&self, ids: &[String], on_removed: F) -> Vec<String>
    where
        F: FnOnce(&[String]),
    {
        let mut inner = self.write();
        let removed: Vec<String> = ids
            .iter()
            .filter(|id| inner.markers.remove(id.as_str()).is_some())
            .cloned()
            .collect();
        if !removed.is_empty() {
            on_removed(&removed);
        }
        removed
    }

    /// Empty the store and start a new epoch. Returns the new epoch.
    pub fn clear<F>(&self, on_clear: F) -> u64
    where
        F: FnOnce(),
    {
        let mut inner = self.write();
        inner.markers.clear();
        inner.epoch += 1;
        on_clear();
        inner.epoch
    }
}
