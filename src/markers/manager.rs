//! Marker lifecycle orchestration.
//!
//! [`MarkerManager`] owns the marker store and the update throttler for one
//! map surface and turns add/update/remove/clear requests into ordered
//! surface commands. Artwork is loaded in background tasks and swapped in
//! once ready; every such commit is checked against the store's epoch and
//! the marker's revision so late completions never resurrect or overwrite
//! newer state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::config::MarkerOptions;
use crate::core::geo::LatLng;
use crate::icons::{AvatarComposer, IconResolver, IconSource, MarkerBitmap};
use crate::markers::operation::MarkerOperation;
use crate::markers::spec::{ClusteringOptions, MarkerSpec, MarkerUpdate};
use crate::markers::store::{MarkerState, MarkerStore, PositionWrite};
use crate::markers::throttle::{ThrottleDecision, UpdateThrottler};
use crate::surface::adapter::Annotation;
use crate::surface::worker::SurfaceHandle;
use crate::{runtime, MarkerError, Result};

/// Counts background tasks so callers can wait for quiescence
#[derive(Debug, Default)]
struct TaskTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl TaskTracker {
    fn track(self: &Arc<Self>) -> TaskGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        TaskGuard(self.clone())
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Released when the tracked task finishes or is aborted
struct TaskGuard(Arc<TaskTracker>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct ManagerInner {
    options: MarkerOptions,
    store: MarkerStore,
    icons: Arc<IconResolver>,
    avatars: Arc<AvatarComposer>,
    surface: SurfaceHandle,
    throttler: Mutex<UpdateThrottler>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    clustering: RwLock<ClusteringOptions>,
    tasks: Arc<TaskTracker>,
}

/// Marker lifecycle manager for one map surface. Cheap to clone.
#[derive(Clone)]
pub struct MarkerManager {
    inner: Arc<ManagerInner>,
}

impl MarkerManager {
    /// Create a manager driving `surface`, which must already be
    /// initialized. The default clustering from `options` is applied.
    pub fn new(
        options: MarkerOptions,
        surface: SurfaceHandle,
        icons: Arc<IconResolver>,
        avatars: Arc<AvatarComposer>,
    ) -> Self {
        if let Err(e) = surface.configure(options.clustering.clone()) {
            log::warn!("could not apply default clustering: {}", e);
        }
        Self {
            inner: Arc::new(ManagerInner {
                store: MarkerStore::new(),
                throttler: Mutex::new(UpdateThrottler::from_config(&options.throttle)),
                flush_task: Mutex::new(None),
                clustering: RwLock::new(options.clustering.clone()),
                tasks: Arc::new(TaskTracker::default()),
                options,
                icons,
                avatars,
                surface,
            }),
        }
    }

    /// Options this manager was built with
    pub fn options(&self) -> &MarkerOptions {
        &self.inner.options
    }

    /// Shared icon resolver and its cache
    pub fn icons(&self) -> &Arc<IconResolver> {
        &self.inner.icons
    }

    /// Shared avatar composer and its cache
    pub fn avatars(&self) -> &Arc<AvatarComposer> {
        &self.inner.avatars
    }

    /// Run one queued or direct operation
    pub async fn execute(&self, operation: MarkerOperation) -> Result<()> {
        log::debug!("executing {}", operation.name());
        match operation {
            MarkerOperation::Add {
                markers,
                clustering,
            } => self.add_markers(markers, clustering).await.map(|_| ()),
            MarkerOperation::Update(updates) => self.update_markers(updates).await,
            MarkerOperation::Remove(ids) => self.remove_markers(&ids).map(|_| ()),
            MarkerOperation::ClearAll => self.clear_all(),
            MarkerOperation::SetClustering(options) => self.set_clustering_options(options),
        }
    }

    /// Add markers in batches, skipping ids that already exist. Resolves
    /// once every batch is attached with a placeholder dot; real icons and
    /// avatars are swapped in as they load. Returns the number added.
    pub async fn add_markers(
        &self,
        markers: Vec<MarkerSpec>,
        clustering: Option<ClusteringOptions>,
    ) -> Result<usize> {
        if let Some(options) = clustering {
            self.set_clustering_options(options)?;
        }
        let markers: Vec<_> = markers
            .into_iter()
            .filter(|spec| {
                let valid = spec.position.is_valid() && !spec.id.is_empty();
                if !valid {
                    log::warn!("skipping invalid marker {:?} at {:?}", spec.id, spec.position);
                }
                valid
            })
            .collect();

        let total = markers.len();
        let epoch = self.inner.store.epoch();
        let added = self.inner.add_batches(markers, epoch).await?;
        log::info!("added {} of {} markers", added, total);
        Ok(added)
    }

    /// Throttled position updates. Ids that do not exist yet are created.
    pub async fn update_markers(&self, updates: Vec<MarkerUpdate>) -> Result<()> {
        let inner = &self.inner;
        let updates: Vec<_> = updates
            .into_iter()
            .filter(|update| {
                let valid = update.position.is_valid();
                if !valid {
                    log::warn!("skipping update for {} at invalid {:?}", update.id, update.position);
                }
                valid
            })
            .collect();

        // Avatar swaps bypass the throttle
        let epoch = inner.store.epoch();
        for update in &updates {
            let Some(url) = update.avatar_url.as_deref().filter(|url| !url.is_empty()) else {
                continue;
            };
            if let Some(state) = inner.store.set_avatar(&update.id, url) {
                log::debug!("avatar for {} changed to {}", update.id, url);
                inner.spawn_artwork(state, None, epoch);
            }
        }

        let (implied, epoch) = {
            let mut throttler = inner.throttler();
            let decision = throttler.submit(updates, Instant::now(), |id| inner.store.position(id));
            let epoch = inner.store.epoch();
            match decision {
                ThrottleDecision::ApplyNow(batch) => (inner.apply_positions(batch, epoch), epoch),
                ThrottleDecision::Buffered { arm_timer } => {
                    if let Some(delay) = arm_timer {
                        inner.arm_flush(delay);
                    }
                    (Vec::new(), epoch)
                }
            }
        };
        inner.heal(implied, epoch).await
    }

    /// Remove markers by id; unknown ids are ignored. Returns how many
    /// were removed. Cached icons are kept.
    pub fn remove_markers(&self, ids: &[String]) -> Result<usize> {
        let inner = &self.inner;
        let mut sent = Ok(());
        let removed = {
            let mut throttler = inner.throttler();
            let removed = inner
                .store
                .remove(ids, |present| sent = inner.surface.detach(present.to_vec()));
            throttler.discard(ids);
            removed
        };
        sent?;
        log::debug!("removed {} of {} requested markers", removed.len(), ids.len());
        Ok(removed.len())
    }

    /// Detach everything and reset the store, pending updates, the flush
    /// timer, and both image caches.
    pub fn clear_all(&self) -> Result<()> {
        let inner = &self.inner;
        let mut sent = Ok(());
        let epoch = {
            let mut throttler = inner.throttler();
            if let Some(task) = inner.flush_task().take() {
                task.abort();
            }
            throttler.clear();
            inner.store.clear(|| sent = inner.surface.detach_all())
        };
        inner.icons.clear_cache();
        inner.avatars.clear_cache();
        log::info!("cleared all markers, epoch {}", epoch);
        sent
    }

    /// Store the options and forward them to the surface
    pub fn set_clustering_options(&self, options: ClusteringOptions) -> Result<()> {
        log::debug!("clustering options set to {:?}", options);
        match self.inner.clustering.write() {
            Ok(mut current) => *current = options.clone(),
            Err(poisoned) => *poisoned.into_inner() = options.clone(),
        }
        self.inner.surface.configure(options)
    }

    /// Clustering options last applied
    pub fn clustering_options(&self) -> ClusteringOptions {
        match self.inner.clustering.read() {
            Ok(options) => options.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Read access to the marker store
    pub fn store(&self) -> &MarkerStore {
        &self.inner.store
    }

    /// Snapshot of every marker, sorted by id
    pub fn markers(&self) -> Vec<MarkerState> {
        self.inner.store.snapshot()
    }

    /// Number of markers in the store
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Whether the store holds no markers
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Whether a marker with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.inner.store.contains(id)
    }

    /// Stored position of a marker. Buffered updates are not reflected
    /// until they flush.
    pub fn position(&self, id: &str) -> Option<LatLng> {
        self.inner.store.position(id)
    }

    /// Buffered updates waiting for the next flush
    pub fn pending_updates(&self) -> usize {
        self.inner.throttler().pending_len()
    }

    /// Wait for scheduled flushes and artwork loads, then for the surface
    /// to apply everything enqueued so far.
    pub async fn settle(&self) -> Result<()> {
        self.inner.tasks.wait_idle().await;
        self.inner.surface.barrier().await
    }

    /// Tear down: cancel pending work, forget markers and stop the surface
    /// worker. Caches are kept for the next surface.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        {
            let mut throttler = inner.throttler();
            if let Some(task) = inner.flush_task().take() {
                task.abort();
            }
            throttler.clear();
            inner.store.clear(|| {});
        }
        inner.surface.shutdown();
        log::info!("marker manager shut down");
    }
}

impl ManagerInner {
    fn throttler(&self) -> MutexGuard<'_, UpdateThrottler> {
        self.throttler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.flush_task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn add_batches(self: &Arc<Self>, markers: Vec<MarkerSpec>, epoch: u64) -> Result<usize> {
        let batch_size = self.options.batch.batch_size.max(1);
        let mut added = 0;

        for batch in markers.chunks(batch_size) {
            let mut placed = Vec::with_capacity(batch.len());
            let mut replies = Vec::with_capacity(batch.len());

            for spec in batch {
                let placeholder = self.icons.default_bitmap(spec.width, spec.height, spec.color);
                let mut attach = None;
                let inserted = self.store.insert_if_absent(spec.clone(), epoch, |state| {
                    attach = Some(
                        self.surface
                            .attach(Annotation::from_spec(&state.spec, placeholder.clone())),
                    );
                });
                match (inserted, attach) {
                    (Some(state), Some(attach)) => {
                        replies.push(attach?);
                        placed.push((state, placeholder));
                    }
                    _ => log::debug!("marker {} already present, skipping", spec.id),
                }
            }

            for ((state, placeholder), reply) in placed.into_iter().zip(join_all(replies).await) {
                match reply {
                    Ok(Ok(handle)) => {
                        self.store.set_handle(&state.spec.id, state.instance, Some(handle));
                    }
                    Ok(Err(e)) => log::warn!("surface rejected marker {}: {}", state.spec.id, e),
                    Err(_) => {
                        return Err(MarkerError::SurfaceUnavailable(
                            "surface worker dropped an attach".into(),
                        ))
                    }
                }
                self.spawn_artwork(state, Some(placeholder), epoch);
                added += 1;
            }

            log::debug!("dispatched batch of {} markers", batch.len());
            tokio::task::yield_now().await;
        }

        Ok(added)
    }

    /// Write positions to the store and enqueue moves. Returns markers to
    /// create for ids that were missing, latest position per id.
    fn apply_positions(&self, batch: Vec<MarkerUpdate>, epoch: u64) -> Vec<MarkerSpec> {
        let mut implied: Vec<MarkerSpec> = Vec::new();
        for update in batch {
            let result = self.store.set_position(&update.id, update.position, epoch, |_| {
                if let Err(e) = self.surface.move_to(&update.id, update.position) {
                    log::warn!("could not move {}: {}", update.id, e);
                }
            });
            match result {
                PositionWrite::Applied => {}
                PositionWrite::Missing => {
                    let spec = MarkerSpec::from_update(&update);
                    match implied.iter_mut().find(|s| s.id == spec.id) {
                        Some(existing) => *existing = spec,
                        None => implied.push(spec),
                    }
                }
                PositionWrite::Stale => break,
            }
        }
        implied
    }

    /// Create markers referenced by updates before any add
    async fn heal(self: &Arc<Self>, implied: Vec<MarkerSpec>, epoch: u64) -> Result<()> {
        if implied.is_empty() {
            return Ok(());
        }
        log::info!("creating {} markers referenced by updates", implied.len());
        self.add_batches(implied, epoch).await.map(|_| ())
    }

    fn arm_flush(self: &Arc<Self>, delay: Duration) {
        let inner = self.clone();
        let guard = self.tasks.track();
        let task = runtime::spawn_delayed(delay, async move {
            let _guard = guard;
            let (implied, epoch) = {
                let mut throttler = inner.throttler();
                let batch = throttler.flush(Instant::now());
                let epoch = inner.store.epoch();
                log::debug!("flushing {} buffered updates", batch.len());
                (inner.apply_positions(batch, epoch), epoch)
            };
            if let Err(e) = inner.heal(implied, epoch).await {
                log::warn!("buffered update flush failed: {}", e);
            }
        });
        // A previous flush may still be creating markers; let it finish
        *self.flush_task() = Some(task);
    }

    /// Load the marker's real icon or avatar and swap it in, unless the
    /// marker changed or was cleared meanwhile. `shown` is the bitmap
    /// currently displayed, if known; an identical result is not re-sent.
    fn spawn_artwork(self: &Arc<Self>, state: MarkerState, shown: Option<MarkerBitmap>, epoch: u64) {
        let plain_dot =
            state.spec.avatar().is_none() && state.spec.icon_source == IconSource::DefaultIcon;
        if plain_dot && shown.is_some() {
            return;
        }

        let inner = self.clone();
        let guard = self.tasks.track();
        runtime::spawn(async move {
            let _guard = guard;
            let bitmap = inner.load_artwork(&state.spec).await;
            if shown.as_ref().is_some_and(|shown| Arc::ptr_eq(shown, &bitmap)) {
                return;
            }
            let id = state.spec.id.as_str();
            let committed = inner
                .store
                .with_current(id, state.instance, state.revision, epoch, |_| {
                    if let Err(e) = inner.surface.set_image(id, bitmap) {
                        log::warn!("could not swap artwork for {}: {}", id, e);
                    }
                });
            if !committed {
                log::debug!("discarding stale artwork for {}", id);
            }
        });
    }

    /// Avatar takes priority over the icon source. Failures fall back to
    /// the default dot.
    async fn load_artwork(&self, spec: &MarkerSpec) -> MarkerBitmap {
        let loaded = match spec.avatar() {
            Some(url) => {
                self.avatars
                    .compose(url, spec.avatar_size(), spec.color.unwrap_or_default())
                    .await
            }
            None => self.icons.resolve(&spec.icon_request()).await,
        };
        loaded.unwrap_or_else(|e| {
            log::warn!("marker {} falls back to the default icon: {}", spec.id, e);
            self.icons.default_bitmap(spec.width, spec.height, spec.color)
        })
    }
}
